use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use vms_core::entities::KindOutcome;
use vms_core::enums::{KindStatus, RecordKind};
use vms_sync::RunObserver;

use crate::ui;

/// One spinner per record kind while a run is in flight.
pub struct KindProgress {
    multi: MultiProgress,
    bars: Mutex<HashMap<RecordKind, ProgressBar>>,
}

impl KindProgress {
    /// `None` when progress output is disabled (not a TTY, `--quiet`).
    #[must_use]
    pub fn for_terminal() -> Option<Self> {
        ui::prefs().progress.then(|| Self {
            multi: MultiProgress::new(),
            bars: Mutex::new(HashMap::new()),
        })
    }
}

impl RunObserver for KindProgress {
    fn kind_started(&self, kind: RecordKind) {
        let bar = self.multi.add(ProgressBar::new_spinner());
        bar.enable_steady_tick(Duration::from_millis(100));
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_message(format!("syncing {kind}"));
        if let Ok(mut bars) = self.bars.lock() {
            bars.insert(kind, bar);
        }
    }

    fn kind_finished(&self, outcome: &KindOutcome) {
        let message = finish_message(outcome);
        let bar = self
            .bars
            .lock()
            .ok()
            .and_then(|mut bars| bars.remove(&outcome.kind));
        match bar {
            Some(bar) => bar.finish_with_message(message),
            // Kinds that never started (cancelled, skipped) still get a line.
            None => {
                let _ = self.multi.println(format!("- {message}"));
            }
        }
    }
}

fn finish_message(outcome: &KindOutcome) -> String {
    let c = &outcome.counts;
    match outcome.status {
        KindStatus::Succeeded => format!(
            "{}: {} fetched, {} created, {} updated, {} unchanged, {} skipped, {} conflicted",
            outcome.kind, c.fetched, c.created, c.updated, c.unchanged, c.skipped, c.conflicted
        ),
        KindStatus::Failed => format!(
            "{}: failed ({})",
            outcome.kind,
            outcome.error.as_deref().unwrap_or("unknown error")
        ),
        KindStatus::Cancelled => format!("{}: cancelled", outcome.kind),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use vms_core::entities::{KindCounts, KindOutcome};
    use vms_core::enums::RecordKind;

    use super::finish_message;

    #[test]
    fn messages_describe_each_outcome() {
        let counts = KindCounts {
            fetched: 4,
            created: 3,
            unchanged: 1,
            ..KindCounts::default()
        };
        assert_eq!(
            finish_message(&KindOutcome::succeeded(RecordKind::School, counts)),
            "school: 4 fetched, 3 created, 0 updated, 1 unchanged, 0 skipped, 0 conflicted"
        );
        assert_eq!(
            finish_message(&KindOutcome::failed(
                RecordKind::ParticipationLink,
                KindCounts::default(),
                "dependency_failed"
            )),
            "participation_link: failed (dependency_failed)"
        );
        assert_eq!(
            finish_message(&KindOutcome::cancelled(RecordKind::User)),
            "user: cancelled"
        );
    }
}
