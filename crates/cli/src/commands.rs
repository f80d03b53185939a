use std::collections::HashSet;
use std::path::Path;

use anyhow::Context;
use rosterwatch_core::{Candidate, JsonStore, ParsedFilter, parse_filter};

use crate::cli::{CandidatesAction, ConfigAction, ConfigSetArgs, MatchedAction};

/// Read a JSON array of candidates, returning the identifiers seen more than once.
pub(crate) fn read_candidates_file(path: &Path) -> anyhow::Result<(Vec<Candidate>, Vec<String>)> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read {}", path.display()))?;
    let candidates: Vec<Candidate> = serde_json::from_str(&raw)
        .with_context(|| format!("parse {} as a JSON array of candidates", path.display()))?;

    let mut seen = HashSet::new();
    let mut duplicates = Vec::new();
    for id in candidates.iter().filter_map(|c| c.identifier.as_deref()) {
        if !seen.insert(id) && !duplicates.iter().any(|d| d == id) {
            duplicates.push(id.to_string());
        }
    }
    Ok((candidates, duplicates))
}

pub(crate) async fn candidates(store: &JsonStore, action: CandidatesAction) -> anyhow::Result<()> {
    match action {
        CandidatesAction::Load { file } => {
            let (candidates, duplicates) = read_candidates_file(&file)?;
            if !duplicates.is_empty() {
                log::warn!(
                    "{} identifier(s) appear more than once: {}",
                    duplicates.len(),
                    duplicates.join(", ")
                );
            }
            let invalid = candidates.iter().filter(|c| c.target().is_err()).count();
            if invalid > 0 {
                log::warn!("{invalid} candidate(s) have no usable target URL and will be skipped");
            }
            store.set_candidates(&candidates).await?;
            println!("Loaded {} candidate(s) into {}.", candidates.len(), store.dir().display());
        }
        CandidatesAction::Show => {
            let candidates = store.candidates().await?;
            for c in &candidates {
                let days = c.days_out.map(|d| d.to_string()).unwrap_or_else(|| "-".to_string());
                println!(
                    "{}\t{}\t{}",
                    c.identifier.as_deref().unwrap_or("-"),
                    days,
                    c.target_url.as_deref().unwrap_or("-")
                );
            }
            println!("{} candidate(s)", candidates.len());
        }
    }
    Ok(())
}

pub(crate) async fn matched(store: &JsonStore, action: MatchedAction) -> anyhow::Result<()> {
    match action {
        MatchedAction::Show => {
            let matched = store.matched().await?;
            for m in &matched {
                println!(
                    "{}\t{}\t{}",
                    m.matched_at.to_rfc3339(),
                    m.identifier.as_deref().unwrap_or("-"),
                    m.target_url
                );
            }
            println!("{} match(es)", matched.len());
        }
        MatchedAction::Clear => {
            let count = store.matched().await?.len();
            store.clear_matched().await?;
            println!("Cleared {count} match(es); they will be inspected again from the next sweep.");
        }
    }
    Ok(())
}

pub(crate) async fn config(store: &JsonStore, action: ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            let settings = store.settings().await?;
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
        ConfigAction::Set(args) => {
            let settings = apply_config(store.settings().await?, args);
            if let ParsedFilter::Fallback { reason, .. } = parse_filter(&settings.filter) {
                log::warn!(
                    "filter {:?} is not valid ({reason}); sweeps will include every candidate",
                    settings.filter
                );
            }
            store.set_settings(&settings).await?;
            println!("{}", serde_json::to_string_pretty(&store.settings().await?)?);
        }
    }
    Ok(())
}

fn apply_config(
    mut settings: rosterwatch_core::Settings,
    args: ConfigSetArgs,
) -> rosterwatch_core::Settings {
    if let Some(filter) = args.filter {
        settings.filter = filter;
    }
    if let Some(concurrency) = args.concurrency {
        settings.concurrency = concurrency as usize;
    }
    if let Some(secs) = args.job_timeout {
        settings.job_timeout_secs = (secs > 0).then_some(secs);
    }
    if let Some(param) = args.marker_param {
        settings.marker_param = param;
    }
    settings.normalize();
    settings
}

pub(crate) async fn status(store: &JsonStore) -> anyhow::Result<()> {
    let status = store.status().await?;
    let progress = store.progress().await?;
    let candidates = store.candidates().await?.len();
    let matched = store.matched().await?.len();

    println!("monitoring: {}", serde_json::to_string(&status)?.trim_matches('"'));
    match progress {
        Some(p) => println!("progress:   {}/{}", p.current, p.total),
        None => println!("progress:   not running"),
    }
    println!("candidates: {candidates}");
    println!("matched:    {matched}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_candidates_and_reports_duplicates() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("list.json");
        std::fs::write(
            &path,
            r#"[
                {"identifier": "a", "targetUrl": "https://x.test/a", "daysOut": 3},
                {"identifier": "b", "targetUrl": "https://x.test/b"},
                {"identifier": "a", "targetUrl": "https://x.test/a2", "daysOut": 1},
                {"identifier": "a", "targetUrl": "https://x.test/a3"},
                {"targetUrl": "https://x.test/anon"}
            ]"#,
        )
        .unwrap();

        let (candidates, duplicates) = read_candidates_file(&path).unwrap();
        assert_eq!(candidates.len(), 5);
        assert_eq!(duplicates, ["a"]);
        assert_eq!(candidates[4].identifier, None);
    }

    #[test]
    fn rejects_non_array_files() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("list.json");
        std::fs::write(&path, r#"{"identifier": "a"}"#).unwrap();
        assert!(read_candidates_file(&path).is_err());
    }

    #[test]
    fn config_set_keeps_omitted_fields() {
        let base = rosterwatch_core::Settings {
            filter: ">=5".into(),
            ..Default::default()
        };
        let out = apply_config(
            base.clone(),
            ConfigSetArgs {
                filter: None,
                concurrency: Some(8),
                job_timeout: Some(0),
                marker_param: None,
            },
        );
        assert_eq!(out.filter, ">=5");
        assert_eq!(out.concurrency, 8);
        assert_eq!(out.job_timeout_secs, None);
        assert_eq!(out.marker_param, base.marker_param);
    }
}
