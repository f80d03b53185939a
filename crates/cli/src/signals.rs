use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    /// First CTRL+C: stop monitoring and exit cleanly.
    Stop,
    /// Second CTRL+C: exit now.
    Abort,
}

pub fn spawn_interrupt_listener(tx: mpsc::UnboundedSender<Interrupt>) {
    tokio::spawn(async move {
        let mut presses = 0u8;
        loop {
            if let Err(err) = tokio::signal::ctrl_c().await {
                log::warn!("cannot listen for CTRL+C: {err}");
                return;
            }
            presses = presses.saturating_add(1);
            let interrupt = if presses == 1 {
                Interrupt::Stop
            } else {
                Interrupt::Abort
            };
            if tx.send(interrupt).is_err() || interrupt == Interrupt::Abort {
                return;
            }
        }
    });
}
