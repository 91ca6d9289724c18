//! Federated search across the stations of a pipeline.
//!
//! One search fans out to every live station at once, each on its own
//! blocking worker. A station that fails, panics or times out yields a
//! [`ResultSet`] carrying the error; it never fails the search or its
//! siblings. Results come back in configured station order whatever order
//! the workers finish in.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::Serialize;
use std::any::Any;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::{Config, SearchConfig};
use crate::criteria::Criterion;
use crate::error::StationError;
use crate::memory::InstanceMemory;
use crate::models::{merge_instances, unique_instance_ids, Instance, ItemRef, ResultSet, StationId};
use crate::pipeline::{connection_pool, Pipeline};
use crate::retry::RetryPolicy;
use crate::traits::{Station, StationContext, StationRegistry};

/// What one search produced.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchOutcome {
    /// One entry per station searched or skipped, in configured order.
    pub result_sets: Vec<ResultSet>,
    /// Failure after the stations were searched. Results are still valid.
    pub error: Option<String>,
}

impl SearchOutcome {
    pub fn all_item_refs(&self) -> Vec<Arc<ItemRef>> {
        self.result_sets
            .iter()
            .flat_map(|rs| rs.items.iter().cloned())
            .collect()
    }

    pub fn all_instances(&self) -> Vec<&Instance> {
        merge_instances(&self.result_sets)
    }

    /// Non-empty instance ids, duplicates included.
    pub fn instance_ids(&self) -> Vec<String> {
        self.result_sets.iter().flat_map(|rs| rs.instance_ids()).collect()
    }

    pub fn unique_instance_ids(&self) -> Vec<String> {
        unique_instance_ids(&self.result_sets)
    }

    pub fn count(&self) -> usize {
        self.result_sets.iter().map(ResultSet::len).sum()
    }

    /// A search-level error, not counting per-station errors.
    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn station_errors(&self) -> impl Iterator<Item = &ResultSet> {
        self.result_sets.iter().filter(|rs| rs.has_error())
    }
}

/// Runs searches against a pipeline and keeps the criteria and results of
/// the current one.
pub struct Search {
    pipeline: Arc<Pipeline>,
    memory: Arc<InstanceMemory>,
    retry: RetryPolicy,
    station_timeout: Option<Duration>,
    criteria: Vec<Criterion>,
    results: Option<SearchOutcome>,
}

impl Search {
    pub fn new(pipeline: Arc<Pipeline>, memory: Arc<InstanceMemory>) -> Self {
        Self {
            pipeline,
            memory,
            retry: RetryPolicy::default(),
            station_timeout: None,
            criteria: Vec::new(),
            results: None,
        }
    }

    pub fn with_config(mut self, config: &SearchConfig) -> Self {
        self.retry = RetryPolicy::new(config.max_attempts);
        self.station_timeout = config.station_timeout_secs.map(Duration::from_secs);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Report a station as failed when its search takes longer than `limit`.
    ///
    /// The station's blocking worker cannot be interrupted and runs to
    /// completion in the background; whatever it finds afterwards is
    /// dropped without being registered in the memory.
    pub fn with_station_timeout(mut self, limit: Duration) -> Self {
        self.station_timeout = Some(limit);
        self
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    pub fn memory(&self) -> &Arc<InstanceMemory> {
        &self.memory
    }

    pub fn criteria(&self) -> &[Criterion] {
        &self.criteria
    }

    pub fn set_criteria(&mut self, criteria: Vec<Criterion>) {
        self.criteria = criteria;
    }

    /// Outcome of the last stateful search, if any.
    pub fn results(&self) -> Option<&SearchOutcome> {
        self.results.as_ref()
    }

    pub fn clear_results(&mut self) {
        self.results = None;
    }

    /// Search with the stored criteria.
    pub async fn do_search(&mut self, role: Option<&str>) -> &SearchOutcome {
        let outcome = self.search(&self.criteria, role).await;
        self.results.insert(outcome)
    }

    /// Search with `criteria` in place of the stored criteria, which are
    /// left as they were.
    pub async fn do_search_with_specified_criteria(
        &mut self,
        criteria: &[Criterion],
        role: Option<&str>,
    ) -> &SearchOutcome {
        let outcome = self.search(criteria, role).await;
        self.results.insert(outcome)
    }

    /// Search with the stored criteria plus `extra`, without storing it.
    pub async fn do_search_with_additional_criterion(
        &mut self,
        extra: Criterion,
        role: Option<&str>,
    ) -> &SearchOutcome {
        let mut criteria = self.criteria.clone();
        criteria.push(extra);
        let outcome = self.search(&criteria, role).await;
        self.results.insert(outcome)
    }

    /// Search with `only` as the sole criterion, without storing it.
    pub async fn do_search_with_specified_criterion(
        &mut self,
        only: Criterion,
        role: Option<&str>,
    ) -> &SearchOutcome {
        let outcome = self.search(std::slice::from_ref(&only), role).await;
        self.results.insert(outcome)
    }

    /// Run one search. `role` restricts it to stations having that role.
    ///
    /// Never fails: per-station problems are reported in the station's
    /// result set and a failure while populating public fields in
    /// [`SearchOutcome::error`].
    pub async fn search(&self, criteria: &[Criterion], role: Option<&str>) -> SearchOutcome {
        let criteria: Arc<[Criterion]> = criteria.into();

        // custom fields some station can search on that these criteria use
        let referenced: Arc<[String]> = self
            .pipeline
            .configured_searchable_custom_fields()
            .into_iter()
            .filter(|f| criteria.iter().any(|c| c.field_is(&f.name)))
            .map(|f| f.name)
            .collect();

        debug!(stations = self.pipeline.stations().len(), criteria = criteria.len(), "starting search");

        let bag: Arc<Mutex<Vec<ResultSet>>> = Arc::new(Mutex::new(Vec::new()));
        let mut tasks = JoinSet::new();

        for live in self.pipeline.stations() {
            let job = StationJob {
                id: live.id,
                station: Arc::clone(&live.station),
                criteria: Arc::clone(&criteria),
                role: role.map(str::to_string),
                referenced: Arc::clone(&referenced),
                retry: self.retry,
                memory: Arc::clone(&self.memory),
                abandoned: Arc::new(AtomicBool::new(false)),
            };
            let abandoned = Arc::clone(&job.abandoned);
            let bag = Arc::clone(&bag);
            let timeout = self.station_timeout;

            tasks.spawn(async move {
                let id = job.id;
                let name = job.station.description().to_string();
                let handle = tokio::task::spawn_blocking(move || job.run());

                let joined = match timeout {
                    Some(limit) => match tokio::time::timeout(limit, handle).await {
                        Ok(joined) => joined,
                        Err(_) => {
                            abandoned.store(true, Ordering::SeqCst);
                            warn!(station = %name, "timed out after {:?}", limit);
                            let message = format!("Station timed out after {:?}", limit);
                            bag.lock().push(ResultSet::failed(id, name, message));
                            return;
                        }
                    },
                    None => handle.await,
                };

                match joined {
                    Ok(Some(result_set)) => bag.lock().push(result_set),
                    Ok(None) => {}
                    Err(e) => {
                        let message = if e.is_panic() {
                            format!("Station search panicked: {}", panic_message(e.into_panic()))
                        } else {
                            "Station search was cancelled".to_string()
                        };
                        error!(station = %name, "{}", message);
                        bag.lock().push(ResultSet::failed(id, name, message));
                    }
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("station task failed: {}", e);
            }
        }

        let mut result_sets = std::mem::take(&mut *bag.lock());
        result_sets.sort_by_key(|rs| rs.station);

        let error = self.populate_public_fields(&result_sets);

        let outcome = SearchOutcome { result_sets, error };
        info!(
            result_sets = outcome.result_sets.len(),
            items = outcome.count(),
            failed = outcome.station_errors().count(),
            "search finished"
        );
        outcome
    }

    /// Let every live station annotate the merged results, in order. Stops
    /// at the first failure.
    fn populate_public_fields(&self, result_sets: &[ResultSet]) -> Option<String> {
        for live in self.pipeline.stations() {
            let fields = live.station.public_fields();
            if let Err(e) = live.station.set_public_field_values(&fields, result_sets) {
                let message = format!("Error populating public fields: {:#}", e);
                warn!(station = %live.station.description(), "{}", message);
                return Some(message);
            }
        }
        None
    }
}

/// Everything one station's worker needs, owned so it can move to a
/// blocking thread.
struct StationJob {
    id: StationId,
    station: Arc<dyn Station>,
    criteria: Arc<[Criterion]>,
    role: Option<String>,
    referenced: Arc<[String]>,
    retry: RetryPolicy,
    memory: Arc<InstanceMemory>,
    /// Set once the coordinator stopped waiting for this station.
    abandoned: Arc<AtomicBool>,
}

impl StationJob {
    /// `None` when the station does not take part in this search.
    fn run(self) -> Option<ResultSet> {
        let name = self.station.description().to_string();

        if let Err(e) = self.station.check_supported_criteria(&self.criteria) {
            debug!(station = %name, "skipped: {}", e);
            return Some(ResultSet::failed(
                self.id,
                name,
                format!("Station skipped: {}", e.chain_message()),
            ));
        }

        if let Some(role) = &self.role {
            if !self.station.has_role(role) {
                debug!(station = %name, role = %role, "lacks role, not searched");
                return None;
            }
        }

        let searchable = self.station.searchable_fields();
        if let Some(missing) = self
            .referenced
            .iter()
            .find(|field| !searchable.iter().any(|f| &f.name == *field))
        {
            debug!(station = %name, field = %missing, "custom field not searchable here, not searched");
            return None;
        }

        let (result, attempts) = self.retry.run(&name, |_| self.station.do_search(&self.criteria));
        match result {
            Ok(_) if self.abandoned.load(Ordering::SeqCst) => {
                debug!(station = %name, attempts, "finished after timeout, results dropped");
                None
            }
            Ok(instances) => {
                let mut result_set = ResultSet::new(self.id, name);
                result_set.items = instances
                    .into_iter()
                    .map(|instance| self.memory.add_ref(instance, self.id))
                    .collect();
                debug!(station = %result_set.station_name, attempts, items = result_set.len(), "searched");
                Some(result_set)
            }
            Err(e @ StationError::UnsupportedCriterion(_)) => {
                debug!(station = %name, "skipped during search: {}", e);
                Some(ResultSet::failed(
                    self.id,
                    name,
                    format!("Station skipped: {}", e.chain_message()),
                ))
            }
            Err(e) => {
                let message = e.chain_message();
                warn!(station = %name, attempts, "search failed: {}", message);
                Some(ResultSet::failed(self.id, name, message))
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Drive `fut` to completion on a fresh multi-threaded runtime, then shut
/// the runtime down without waiting for blocking workers that are still
/// running, such as stations abandoned after a timeout.
pub fn block_on_detached<F: Future>(fut: F) -> Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("stw-worker")
        .build()
        .context("Failed to create tokio runtime")?;
    let output = runtime.block_on(fut);
    runtime.shutdown_background();
    Ok(output)
}

/// Build the pipeline described by `config`, search it once and print the
/// outcome.
pub async fn run_search(
    config: &Config,
    criteria: &[Criterion],
    role: Option<&str>,
    json: bool,
) -> Result<()> {
    let pool = connection_pool(&config.pool)?;
    let ctx = StationContext::new(pool);
    let pipeline = Arc::new(Pipeline::from_config(config, &StationRegistry::with_builtins(), &ctx));
    for err in pipeline.errors() {
        eprintln!("{}", err);
    }

    let mut search = Search::new(Arc::clone(&pipeline), Arc::new(InstanceMemory::new()))
        .with_config(&config.search);
    search.set_criteria(criteria.to_vec());
    let outcome = search.do_search(role).await;

    if json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
    } else {
        print_outcome(outcome);
    }

    pipeline.shutdown();
    Ok(())
}

fn print_outcome(outcome: &SearchOutcome) {
    if outcome.result_sets.is_empty() {
        println!("No stations searched.");
    }

    for rs in &outcome.result_sets {
        println!("── {} ({} items)", rs.station_name, rs.len());
        if let Some(err) = &rs.error {
            println!("    error: {}", err);
        }
        for item in &rs.items {
            let instance = item.instance();
            println!(
                "    [{}] {}  {}",
                item.id(),
                instance.summary(),
                instance.location.as_deref().unwrap_or("")
            );
            for (field, values) in item.public_fields() {
                println!("        {} = {}", field, values.join(", "));
            }
        }
    }

    println!();
    println!(
        "{} items, {} distinct ids, {} station errors",
        outcome.count(),
        outcome.unique_instance_ids().len(),
        outcome.station_errors().count()
    );
    if let Some(err) = &outcome.error {
        println!("error: {}", err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RefId;

    fn outcome() -> SearchOutcome {
        let memory = InstanceMemory::starting_at(0);
        let mut a = ResultSet::new(StationId(0), "a");
        a.items.push(memory.add_ref(Instance::new("ORDER").with_id("7"), StationId(0)));
        a.items.push(memory.add_ref(Instance::new("ORDER").with_id("8"), StationId(0)));
        let mut b = ResultSet::new(StationId(1), "b");
        b.items.push(memory.add_ref(Instance::new("ORDER").with_id("7"), StationId(1)));
        let c = ResultSet::failed(StationId(2), "c", "Station skipped: Unsupported operation: LIKE");
        SearchOutcome {
            result_sets: vec![a, b, c],
            error: None,
        }
    }

    #[test]
    fn aggregates() {
        let o = outcome();
        assert_eq!(o.count(), 3);
        assert_eq!(o.instance_ids(), vec!["7", "8", "7"]);
        assert_eq!(o.unique_instance_ids(), vec!["7", "8"]);
        assert_eq!(o.all_instances().len(), 3);
        let ids: Vec<RefId> = o.all_item_refs().iter().map(|r| r.id()).collect();
        assert_eq!(ids, vec![RefId(1), RefId(2), RefId(3)]);
        assert!(!o.has_error());
        assert_eq!(o.station_errors().count(), 1);
    }

    #[test]
    fn panic_payloads() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new(String::from("bang"))), "bang");
        assert_eq!(panic_message(Box::new(42u8)), "unknown panic");
    }
}
