//! Death-date sync run
//!
//! Reads every external id of the configured identifier source, asks the
//! knowledge graph for their death dates in batches and writes the dates that
//! are new or changed. Only persons with a returned date are touched; a failed
//! graph batch simply contributes nothing.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use super::{RunTracker, SyncEngine};
use crate::models::{DeathDateOptions, DeathDateStats, SyncPhase, SyncReport};

impl SyncEngine {
    pub(super) async fn run_death_date_sync(
        &self,
        options: &DeathDateOptions,
        tracker: &mut RunTracker<'_>,
    ) -> SyncReport<DeathDateStats> {
        let start_time = Instant::now();
        let source = self.settings.death_date_identifier_source.as_str();

        tracker.enter(SyncPhase::Listing);
        let identifiers =
            match crate::db::persons::load_identifiers_with_death_dates(&self.db, source).await {
                Ok(identifiers) => identifiers,
                Err(e) => {
                    tracing::warn!(source, error = %e, "Failed to load identifiers, aborting run");
                    tracker.enter(SyncPhase::Done);
                    return SyncReport::failed(format!("identifiers: {}", e));
                }
            };

        let external_ids: Vec<String> = identifiers.iter().map(|i| i.external_id.clone()).collect();
        tracker
            .progress(0, format!("Querying {} identifiers", external_ids.len()))
            .await;

        tracker.enter(SyncPhase::Resolving);
        let dates: HashMap<String, _> = self
            .death_date_source
            .fetch_death_dates(&external_ids)
            .await
            .into_iter()
            .map(|(id, date)| (id.to_lowercase(), date))
            .collect();

        tracker.enter(SyncPhase::Persisting);
        let mut stats = DeathDateStats {
            checked: identifiers.len(),
            ..Default::default()
        };
        let mut errors = Vec::new();
        // A person may carry several ids of the same source
        let mut handled = HashSet::new();

        for identifier in &identifiers {
            let Some(&date) = dates.get(&identifier.external_id.to_lowercase()) else {
                continue;
            };
            if !handled.insert(identifier.person_id) {
                continue;
            }

            if identifier.death_date == Some(date) {
                stats.unchanged += 1;
                continue;
            }

            if !options.dry_run {
                if let Err(e) = self.persister.set_death_date(identifier.person_id, date).await {
                    tracing::warn!(external_id = %identifier.external_id, error = %e, "Failed to set death date");
                    errors.push(format!("person {}: {}", identifier.external_id, e));
                    continue;
                }
            }

            tracing::debug!(
                external_id = %identifier.external_id,
                previous = ?identifier.death_date,
                death_date = %date,
                "Death date updated"
            );
            stats.updated += 1;
        }

        if options.update_mandates && !options.dry_run {
            match self.persister.close_mandates_of_deceased().await {
                Ok(closed) => stats.mandates_closed = closed,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to close mandates");
                    errors.push(format!("mandates: {}", e));
                }
            }
        }

        tracker.enter(SyncPhase::Reporting);
        tracker
            .progress(100, format!("{} death dates updated", stats.updated))
            .await;

        tracing::info!(
            source,
            dry_run = options.dry_run,
            checked = stats.checked,
            updated = stats.updated,
            unchanged = stats.unchanged,
            mandates_closed = stats.mandates_closed,
            errors = errors.len(),
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            "Death-date sync finished"
        );

        tracker.enter(SyncPhase::Done);
        SyncReport {
            success: true,
            stats,
            errors,
            unresolved: Vec::new(),
        }
    }
}
