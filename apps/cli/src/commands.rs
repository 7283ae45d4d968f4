use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use dubsync_engine::{JobContext, JobError, OptimizationMode, Scheduler, TracingProgress};
use dubsync_estimator::DurationEstimator;
use dubsync_rewrite::{FallbackRewriter, HeuristicRewriter, LlmRewriter, NoopRewriter, TextRewriter};
use dubsync_segment::Cue;
use dubsync_storage::ClipCache;
use dubsync_synthesis::minimax::MiniMaxBackend;
use dubsync_synthesis::stub::{words_model, FnBackend};
use dubsync_synthesis::{SpeechBackend, SynthesisAdapter};
use dubsync_timeline::{Aggregator, JobReport};
use tokio_util::sync::CancellationToken;

use crate::config::{AppConfig, Credentials, RewriterKind};

/// Speaking speed of the offline stub voice.
const STUB_WORDS_PER_SECOND: f64 = 2.6;
const STUB_OVERHEAD_SECS: f64 = 0.3;

pub struct RunArgs {
    pub cues: PathBuf,
    pub out: PathBuf,
    pub report: Option<PathBuf>,
    pub language: Option<String>,
    pub voice: Option<String>,
    pub workers: Option<usize>,
    pub mode: Option<OptimizationMode>,
    pub stub: bool,
}

pub fn read_cues(path: &Path) -> anyhow::Result<Vec<Cue>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read cues {}", path.display()))?;
    let cues: Vec<Cue> =
        serde_json::from_str(&raw).with_context(|| format!("invalid cues {}", path.display()))?;
    if cues.is_empty() {
        bail!("{} contains no cues", path.display());
    }
    Ok(cues)
}

pub fn build_adapter(
    config: &AppConfig,
    credentials: &Credentials,
    stub: bool,
) -> anyhow::Result<SynthesisAdapter> {
    let mut adapter = if stub {
        let backend: Arc<dyn SpeechBackend> = Arc::new(FnBackend::new(
            "stub",
            words_model(STUB_WORDS_PER_SECOND, STUB_OVERHEAD_SECS),
        ));
        SynthesisAdapter::new(backend)
    } else {
        let mut minimax = config.minimax.clone();
        if let Some(group_id) = &credentials.minimax_group_id {
            minimax.group_id = group_id.clone();
        }
        let primary = MiniMaxBackend::new(minimax.clone(), credentials.require_minimax()?, "primary")?;
        let mut adapter = SynthesisAdapter::new(Arc::new(primary));
        if let Some(key) = &credentials.minimax_secondary {
            let secondary = MiniMaxBackend::new(minimax, key.as_str(), "secondary")?;
            adapter = adapter.with_secondary(Arc::new(secondary));
        } else {
            tracing::warn!("no backup credential configured, failover disabled");
        }
        adapter
    };

    if config.cache.enabled && !stub {
        let path = config.cache.resolved_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let cache = ClipCache::open(&path)
            .with_context(|| format!("failed to open clip cache {}", path.display()))?;
        tracing::info!(path = %path.display(), "clip_cache_opened");
        adapter = adapter.with_cache(Arc::new(cache));
    }
    Ok(adapter)
}

pub fn build_rewriter(config: &AppConfig, credentials: &Credentials) -> anyhow::Result<Arc<dyn TextRewriter>> {
    let heuristic: Arc<dyn TextRewriter> = Arc::new(HeuristicRewriter);
    Ok(match config.rewriter.kind {
        RewriterKind::None => Arc::new(NoopRewriter),
        RewriterKind::Heuristic => heuristic,
        RewriterKind::Llm => match &credentials.openai {
            Some(key) => {
                let llm = LlmRewriter::new(config.rewriter.llm.clone(), key.as_str())?;
                Arc::new(FallbackRewriter::new(Arc::new(llm), heuristic))
            }
            None => {
                tracing::warn!("OPENAI_API_KEY is not set, using heuristic rewriter");
                heuristic
            }
        },
    })
}

pub async fn run(mut config: AppConfig, args: RunArgs) -> anyhow::Result<()> {
    if let Some(language) = args.language {
        config.language = language;
    }
    if let Some(voice) = args.voice {
        config.voice = voice;
    }
    if let Some(workers) = args.workers {
        config.timing.max_concurrent_workers = workers;
    }
    if let Some(mode) = args.mode {
        config.timing.optimization_mode = Some(mode);
    }

    let cues = read_cues(&args.cues)?;
    let credentials = Credentials::from_env();
    let adapter = build_adapter(&config, &credentials, args.stub)?;
    let rewriter = build_rewriter(&config, &credentials)?;

    let cancel = CancellationToken::new();
    let ctx = JobContext::new(config.timing.clone(), Arc::new(adapter))?
        .with_voice(config.voice.as_str())
        .with_language(config.language.as_str())
        .with_rewriter(rewriter)
        .with_silence_sample_rate(config.minimax.sample_rate)
        .with_cancel_token(cancel.clone());
    let timing = ctx.config.clone();

    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling job");
            on_interrupt.cancel();
        }
    });

    tracing::info!(
        cues = cues.len(),
        language = %config.language,
        voice = %config.voice,
        stub = args.stub,
        "job_starting"
    );
    let scheduler = Scheduler::new(ctx).with_progress(Arc::new(TracingProgress));
    let (outcome, failure) = match scheduler.run(cues).await {
        Ok(outcome) => (outcome, None),
        Err(JobError::Cancelled { outcome }) => (*outcome, Some("job cancelled".to_string())),
        Err(JobError::ServiceOutage { consecutive, outcome }) => (
            *outcome,
            Some(format!(
                "synthesis service unavailable for {consecutive} consecutive segments"
            )),
        ),
        Err(JobError::Worker { message, outcome }) => {
            (*outcome, Some(format!("worker task failed: {message}")))
        }
        Err(e) => return Err(e.into()),
    };

    let timeline = Aggregator::new(&timing).assemble(&outcome.records)?;
    timeline.write_wav(&args.out)?;
    let report = JobReport::build(&outcome, &timeline, &timing);
    let report_path = args
        .report
        .unwrap_or_else(|| args.out.with_extension("report.json"));
    report.write_json(&report_path)?;

    println!("{}", report.render_text());
    println!("Audio: {}", args.out.display());
    println!("Report: {}", report_path.display());

    match failure {
        Some(reason) => bail!("{reason}; partial results written"),
        None => Ok(()),
    }
}

/// Local duration estimates only; no service calls.
pub fn estimate(config: &AppConfig, cues_path: &Path, language: Option<&str>) -> anyhow::Result<()> {
    let cues = read_cues(cues_path)?;
    let language = language.unwrap_or(&config.language);
    let timing = config.timing.clone().resolved();
    let bounds = timing.rate_bounds()?;
    let estimator = DurationEstimator::default();

    println!("{:<10} {:>8} {:>9} {:>7}  status", "id", "target", "estimate", "rate");
    let mut out_of_bounds = 0;
    for cue in &cues {
        let target = cue.end - cue.start;
        let estimate = estimator.estimate(&cue.translated_text, language, 1.0, 1.0);
        let rate = estimator.implied_rate(&cue.translated_text, language, target, 1.0);
        let status = if bounds.contains(rate) {
            "ok"
        } else if rate > bounds.max() {
            out_of_bounds += 1;
            "too long"
        } else {
            out_of_bounds += 1;
            "too short"
        };
        println!("{:<10} {:>8.2} {:>9.2} {:>7.3}  {status}", cue.id, target, estimate, rate);
    }
    println!(
        "{} of {} cues need a rate outside {:.2}..{:.2}",
        out_of_bounds,
        cues.len(),
        bounds.min(),
        bounds.max()
    );
    Ok(())
}

pub fn cache_stats(config: &AppConfig) -> anyhow::Result<()> {
    let path = config.cache.resolved_path();
    let cache = ClipCache::open(&path)
        .with_context(|| format!("failed to open clip cache {}", path.display()))?;
    println!("{}: {} clips", path.display(), cache.len()?);
    Ok(())
}

pub fn cache_prune(config: &AppConfig, older_than_days: u32) -> anyhow::Result<()> {
    let path = config.cache.resolved_path();
    let cache = ClipCache::open(&path)
        .with_context(|| format!("failed to open clip cache {}", path.display()))?;
    let cutoff = chrono::Utc::now() - chrono::Duration::days(i64::from(older_than_days));
    let removed = cache.prune_before(cutoff.timestamp())?;
    println!("removed {removed} clips older than {older_than_days} days");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn cues_file(json: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{json}").unwrap();
        file
    }

    #[test]
    fn test_read_cues() {
        let file = cues_file(
            r#"[{"id": "1", "start": 0.0, "end": 2.5, "translated_text": "Hola"},
                {"id": "2", "start": 3.0, "end": 4.0, "source_text": "Bye", "translated_text": "Adiós"}]"#,
        );
        let cues = read_cues(file.path()).unwrap();
        assert_eq!(cues.len(), 2);
        assert_eq!(cues[0].source_text, "");
        assert_eq!(cues[1].translated_text, "Adiós");
    }

    #[test]
    fn test_read_cues_rejects_empty_and_invalid() {
        assert!(read_cues(cues_file("[]").path()).is_err());
        assert!(read_cues(cues_file("{").path()).is_err());
    }

    #[test]
    fn test_stub_adapter_needs_no_credentials() {
        let adapter = build_adapter(&AppConfig::default(), &Credentials::default(), true).unwrap();
        assert!(!adapter.has_failover());
    }

    #[test]
    fn test_live_adapter_requires_key() {
        let err = build_adapter(&AppConfig::default(), &Credentials::default(), false).err().unwrap();
        assert!(err.to_string().contains("MINIMAX_API_KEY"));
    }

    #[test]
    fn test_llm_rewriter_falls_back_without_key() {
        let mut config = AppConfig::default();
        config.rewriter.kind = RewriterKind::Llm;
        let rewriter = build_rewriter(&config, &Credentials::default()).unwrap();
        assert_eq!(rewriter.name(), "heuristic");
    }

    #[tokio::test]
    async fn test_stub_run_writes_outputs() {
        let dir = tempfile::TempDir::new().unwrap();
        let cues = dir.path().join("cues.json");
        std::fs::write(
            &cues,
            r#"[{"id": "1", "start": 0.0, "end": 2.0, "translated_text": "one two three four"},
                {"id": "2", "start": 2.5, "end": 4.0, "translated_text": "five six seven"}]"#,
        )
        .unwrap();
        let mut config = AppConfig::default();
        config.timing.rate_limit.requests_per_minute = 6000;
        let args = RunArgs {
            cues,
            out: dir.path().join("dub.wav"),
            report: None,
            language: None,
            voice: None,
            workers: Some(2),
            mode: None,
            stub: true,
        };

        run(config, args).await.unwrap();

        assert!(dir.path().join("dub.wav").exists());
        let report: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join("dub.report.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(report["total"], 2);
    }
}
