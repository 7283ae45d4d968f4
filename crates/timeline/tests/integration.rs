//! Integration tests for timeline assembly and reports.

use std::sync::Arc;

use dubsync_engine::{JobContext, JobOutcome, Scheduler, SyncConfig};
use dubsync_segment::{AudioClip, Cue, Quality, RateBounds, SegmentRecord};
use dubsync_synthesis::stub::{FnBackend, ScriptedBackend};
use dubsync_synthesis::{ServiceError, SynthesisAdapter, SynthesisRequest, Ungated};
use dubsync_timeline::{Aggregator, FlagReason, JobReport, TimelineError};
use tempfile::TempDir;

fn cue(id: &str, start: f64, end: f64) -> Cue {
    Cue {
        id: id.to_string(),
        start,
        end,
        source_text: String::new(),
        translated_text: format!("line {id}"),
    }
}

fn config() -> SyncConfig {
    SyncConfig {
        use_estimation_first: false,
        max_concurrent_workers: 2,
        ..Default::default()
    }
}

async fn run_job(backend: Arc<dyn dubsync_synthesis::SpeechBackend>, cues: Vec<Cue>) -> JobOutcome {
    let ctx = JobContext::new(config(), Arc::new(SynthesisAdapter::new(backend)))
        .unwrap()
        .with_gate(Arc::new(Ungated));
    Scheduler::new(ctx).run(cues).await.unwrap()
}

// ============================================================================
// Assembly
// ============================================================================

mod assembly {
    use super::*;

    #[tokio::test]
    async fn test_clips_placed_at_start_times() {
        // Every clip lands 2% short of its window.
        let backend = Arc::new(FnBackend::new("stub", |r: &SynthesisRequest| {
            let id: f64 = r.text.trim_start_matches("line ").parse().unwrap_or(1.0);
            Ok(id * 0.98)
        }));
        let outcome = run_job(backend, vec![cue("2", 3.0, 5.0), cue("1", 0.0, 1.0)]).await;

        let timeline = Aggregator::new(&config()).assemble(&outcome.records).unwrap();

        assert_eq!(timeline.sample_rate, 8000);
        assert_eq!(timeline.placements.len(), 2);
        assert_eq!(timeline.placements[0].segment_id, "1");
        assert_eq!(timeline.placements[1].offset, 24000);
        assert_eq!(timeline.trimmed_count(), 0);
        // Runs to the last segment end.
        assert_eq!(timeline.samples.len(), 40000);
        // Silence between the clips.
        assert!(timeline.samples[12000..23000].iter().all(|s| *s == 0.0));
        assert!(timeline.samples[24100] != 0.0);
    }

    #[tokio::test]
    async fn test_overlapping_clip_is_trimmed() {
        let bounds = RateBounds::new(0.95, 1.15).unwrap();
        let mut first = SegmentRecord::new(cue("a", 0.0, 1.0), bounds).unwrap();
        let mut second = SegmentRecord::new(cue("b", 1.2, 2.0), bounds).unwrap();
        for record in [&mut first, &mut second] {
            let attempt = dubsync_segment::Attempt::new(
                dubsync_segment::AttemptKind::Synthesized,
                record.working_text(),
                1.0,
                1.5,
                record.target_duration(),
            );
            let index = record.push_attempt(attempt).unwrap();
            record
                .accept(index, Quality::Degraded, AudioClip::new(1000, vec![0.5; 1500]), false)
                .unwrap();
        }

        let timeline = Aggregator::new(&config()).assemble(&[second, first]).unwrap();

        let a = timeline.placement("a").unwrap();
        assert!(a.trimmed);
        // 1.5s clip, next start 1.2s: keep 1.5 - 0.3 - 0.05.
        assert!((a.placed_secs - 1.15).abs() < 2e-3);
        let b = timeline.placement("b").unwrap();
        assert!(!b.trimmed);
        assert_eq!(timeline.samples.len(), 1200 + 1500);
        // No sample is mixed from both clips.
        assert!(timeline.samples.iter().all(|s| *s <= 0.5));
    }

    #[tokio::test]
    async fn test_mixed_sample_rates_resampled() {
        // First segment synthesizes at 8 kHz, second degrades to 32 kHz silence.
        let primary = Arc::new(ScriptedBackend::new(
            "k1",
            vec![Ok(0.98), Err(ServiceError::exhausted("quota"))],
        ));
        let ctx = JobContext::new(
            SyncConfig {
                max_concurrent_workers: 1,
                ..config()
            },
            Arc::new(SynthesisAdapter::new(primary)),
        )
        .unwrap()
        .with_gate(Arc::new(Ungated));
        let outcome = Scheduler::new(ctx)
            .run(vec![cue("1", 0.0, 1.0), cue("2", 2.0, 3.0)])
            .await
            .unwrap();

        let timeline = Aggregator::new(&config()).assemble(&outcome.records).unwrap();

        assert_eq!(timeline.sample_rate, 8000);
        assert_eq!(timeline.samples.len(), 24000);
        assert!((timeline.placement("2").unwrap().placed_secs - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_non_terminal_records_rejected() {
        let bounds = RateBounds::new(0.95, 1.15).unwrap();
        let record = SegmentRecord::new(cue("open", 0.0, 1.0), bounds).unwrap();

        let err = Aggregator::new(&config()).assemble(&[record]).unwrap_err();
        assert!(matches!(err, TimelineError::NonTerminal(id) if id == "open"));
    }

    #[tokio::test]
    async fn test_wav_written() {
        let backend = Arc::new(FnBackend::new("stub", |_: &SynthesisRequest| Ok(0.99)));
        let outcome = run_job(backend, vec![cue("1", 0.0, 1.0), cue("2", 1.5, 2.5)]).await;
        let timeline = Aggregator::new(&config()).assemble(&outcome.records).unwrap();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dub.wav");

        timeline.write_wav(&path).unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(spec.sample_rate, 8000);
        assert_eq!(reader.len() as usize, timeline.samples.len());
    }
}

// ============================================================================
// Report
// ============================================================================

mod report {
    use super::*;

    #[tokio::test]
    async fn test_report_counts_and_flags() {
        // "1" converges, "2" stays 20% long at any rate, "3" has no service.
        let backend = Arc::new(FnBackend::new("stub", |r: &SynthesisRequest| {
            match r.text.as_str() {
                "line 1" => Ok(1.0),
                "line 2" => Ok(1.2),
                _ => Err(ServiceError::exhausted("quota")),
            }
        }));
        let outcome = run_job(
            backend,
            vec![cue("1", 0.0, 1.0), cue("2", 2.0, 3.0), cue("3", 4.0, 5.0)],
        )
        .await;
        let timeline = Aggregator::new(&config()).assemble(&outcome.records).unwrap();

        let report = JobReport::build(&outcome, &timeline, &config());

        assert_eq!(report.total, 3);
        assert_eq!(report.quality_distribution["converged"], 1);
        assert_eq!(report.quality_distribution["degraded"], 1);
        assert!((report.percent_converged - 100.0 / 3.0).abs() < 1e-9);
        assert_eq!(report.segments.len(), 3);
        assert_eq!(report.segments[0].id, "1");
        assert_eq!(report.segments[0].quality, Quality::Converged);
        assert_eq!(report.segments[0].attempts_count, 1);

        let gap = report.flagged.iter().find(|f| f.id == "3").unwrap();
        assert!(gap.reasons.contains(&FlagReason::AudioGap));
        assert!(gap.reasons.contains(&FlagReason::Degraded));
        assert!(report.flagged.iter().all(|f| f.id != "1"));
    }

    #[tokio::test]
    async fn test_clip_past_its_window_is_flagged() {
        // "1" runs 40% long into a 0.1 s gap; "2" fits.
        let backend = Arc::new(FnBackend::new("stub", |r: &SynthesisRequest| {
            Ok(if r.text == "line 1" { 1.4 } else { 0.9 })
        }));
        let outcome = run_job(backend, vec![cue("1", 0.0, 1.0), cue("2", 1.1, 2.0)]).await;
        let timeline = Aggregator::new(&config()).assemble(&outcome.records).unwrap();

        let report = JobReport::build(&outcome, &timeline, &config());

        let long = &report.segments[0];
        assert!((long.available_window - 1.0).abs() < 1e-9);
        assert!((long.actual_duration.unwrap() - 1.4).abs() < 1e-3);
        let flags = &report.flagged.iter().find(|f| f.id == "1").unwrap().reasons;
        assert!(flags.contains(&FlagReason::ExceedsWindow));
        assert!(flags.contains(&FlagReason::Trimmed));
        // Last segment may run 20% long.
        assert!((report.segments[1].available_window - 1.08).abs() < 1e-9);
        assert!(report.flagged.iter().all(|f| f.id != "2"));
    }

    #[tokio::test]
    async fn test_report_json_and_text() {
        let backend = Arc::new(FnBackend::new("stub", |_: &SynthesisRequest| Ok(1.0)));
        let outcome = run_job(backend, vec![cue("1", 0.0, 1.0)]).await;
        let timeline = Aggregator::new(&config()).assemble(&outcome.records).unwrap();
        let report = JobReport::build(&outcome, &timeline, &config());
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("report.json");

        report.write_json(&path).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["job_id"], outcome.job_id.as_str());
        assert_eq!(value["segments"][0]["quality"], "converged");
        assert_eq!(value["usage"]["adapter"]["calls"], 1);
        assert_eq!(value["speed_distribution"].as_array().unwrap().len(), 4);

        let text = report.render_text();
        assert!(text.contains("Segments: 1"));
        assert!(text.contains("Converged: 100.0%"));
    }
}
