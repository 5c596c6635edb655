use cadence_core::{Agent, AgentType, CadenceError, CadenceResult};
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Beta, Distribution};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

/// Tuning knobs for [`ThompsonRouter`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Score added to agents with fewer than `min_observations` outcomes.
    pub exploration_bonus: f64,
    /// Outcomes needed before the bonus stops applying.
    pub min_observations: u64,
    /// Fixed RNG seed for reproducible routing; entropy-seeded when absent.
    pub seed: Option<u64>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            exploration_bonus: 0.1,
            min_observations: 5,
            seed: None,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Outcomes {
    successes: u64,
    failures: u64,
}

/// Beta-posterior bookkeeping for one agent.
///
/// Counts sit behind their own lock so concurrent outcome reports for the same
/// agent never lose an increment.
#[derive(Debug)]
pub struct AgentPerformance {
    agent_id: String,
    agent_type: AgentType,
    outcomes: Mutex<Outcomes>,
}

impl AgentPerformance {
    fn new(agent_id: &str, agent_type: AgentType) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            agent_type,
            outcomes: Mutex::new(Outcomes::default()),
        }
    }

    /// Tracked agent id.
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Tracked agent type.
    pub fn agent_type(&self) -> AgentType {
        self.agent_type
    }

    fn record(&self, success: bool) {
        let mut outcomes = self.outcomes.lock();
        if success {
            outcomes.successes += 1;
        } else {
            outcomes.failures += 1;
        }
    }

    fn snapshot(&self) -> Outcomes {
        *self.outcomes.lock()
    }

    /// Empirical rate `s / (s + f)`; 0.5 before any observation.
    pub fn success_rate(&self) -> f64 {
        let o = self.snapshot();
        let total = o.successes + o.failures;
        if total == 0 {
            return 0.5;
        }
        o.successes as f64 / total as f64
    }

    /// Point-in-time summary of the counts.
    pub fn stats(&self) -> PerformanceStats {
        let o = self.snapshot();
        PerformanceStats {
            agent_type: self.agent_type,
            success_rate: self.success_rate(),
            total_tasks: o.successes + o.failures,
            successes: o.successes,
            failures: o.failures,
        }
    }
}

/// Externally visible summary of one agent's routing record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceStats {
    /// Agent specialization.
    pub agent_type: AgentType,
    /// Empirical success rate, 0.5 when unobserved.
    pub success_rate: f64,
    /// Outcomes recorded.
    pub total_tasks: u64,
    /// Successful outcomes.
    pub successes: u64,
    /// Failed outcomes.
    pub failures: u64,
}

#[derive(Default)]
struct Registry {
    by_id: HashMap<String, Arc<AgentPerformance>>,
    by_type: HashMap<AgentType, Vec<String>>,
}

/// Thompson-sampling router over a pool of agents.
///
/// Each agent's success probability is modelled as `Beta(s + 1, f + 1)`. A
/// selection draws one sample per candidate, adds a flat bonus for agents with
/// too few observations, and picks the highest score. Ties go to the earliest
/// candidate in the slice passed to [`ThompsonRouter::select_agent`].
///
/// All state lives in process memory and starts empty.
pub struct ThompsonRouter {
    config: RouterConfig,
    registry: RwLock<Registry>,
    rng: Mutex<StdRng>,
}

impl ThompsonRouter {
    /// A router with no registered agents.
    pub fn new(config: RouterConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            config,
            registry: RwLock::new(Registry::default()),
            rng: Mutex::new(rng),
        }
    }

    /// Active tuning.
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Start tracking `agent`. Re-registering a known id is a no-op.
    pub fn register_agent(&self, agent: &Agent) {
        self.ensure_registered(agent);
    }

    fn ensure_registered(&self, agent: &Agent) -> Arc<AgentPerformance> {
        if let Some(perf) = self.registry.read().by_id.get(&agent.id) {
            return perf.clone();
        }
        let mut registry = self.registry.write();
        if let Some(perf) = registry.by_id.get(&agent.id) {
            return perf.clone();
        }
        let perf = Arc::new(AgentPerformance::new(&agent.id, agent.agent_type));
        registry.by_id.insert(agent.id.clone(), perf.clone());
        registry
            .by_type
            .entry(agent.agent_type)
            .or_default()
            .push(agent.id.clone());
        debug!(
            agent_id = %agent.id,
            agent_type = %agent.agent_type,
            "Registered agent with router"
        );
        perf
    }

    /// Whether `agent_id` is tracked.
    pub fn is_registered(&self, agent_id: &str) -> bool {
        self.registry.read().by_id.contains_key(agent_id)
    }

    /// Pick one agent from `available`.
    ///
    /// Candidates are restricted to `type_hint` when at least one available
    /// agent has that type; otherwise the whole pool competes. Unknown agents
    /// are registered on the way.
    pub fn select_agent<'a>(
        &self,
        available: &'a [Agent],
        type_hint: Option<AgentType>,
    ) -> CadenceResult<&'a Agent> {
        if available.is_empty() {
            return Err(CadenceError::NoAvailableAgents);
        }

        let mut candidates: Vec<&Agent> = match type_hint {
            Some(hint) => available.iter().filter(|a| a.agent_type == hint).collect(),
            None => Vec::new(),
        };
        if candidates.is_empty() {
            candidates = available.iter().collect();
        }

        let performances: Vec<Arc<AgentPerformance>> = candidates
            .iter()
            .map(|agent| self.ensure_registered(agent))
            .collect();

        let mut rng = self.rng.lock();
        let mut best: Option<(usize, f64)> = None;
        for (index, perf) in performances.iter().enumerate() {
            let score = self.score(perf, &mut *rng);
            if best.map_or(true, |(_, top)| score > top) {
                best = Some((index, score));
            }
        }
        drop(rng);

        let index = best.map_or(0, |(index, _)| index);
        let chosen = candidates[index];
        debug!(
            agent_id = %chosen.id,
            agent_type = %chosen.agent_type,
            candidates = candidates.len(),
            hint = ?type_hint,
            "Router selected agent"
        );
        Ok(chosen)
    }

    fn score<R: Rng + ?Sized>(&self, perf: &AgentPerformance, rng: &mut R) -> f64 {
        let o = perf.snapshot();
        let alpha = o.successes as f64 + 1.0;
        let beta = o.failures as f64 + 1.0;
        let sample = match Beta::new(alpha, beta) {
            Ok(dist) => dist.sample(rng),
            Err(_) => alpha / (alpha + beta),
        };
        if o.successes + o.failures < self.config.min_observations {
            sample + self.config.exploration_bonus
        } else {
            sample
        }
    }

    /// Record the outcome of one execution. Returns `false` for unknown agents.
    pub fn update_performance(&self, agent_id: &str, success: bool) -> bool {
        let perf = self.registry.read().by_id.get(agent_id).cloned();
        match perf {
            Some(perf) => {
                perf.record(success);
                true
            }
            None => {
                warn!(agent_id, "Outcome reported for unregistered agent; ignoring");
                false
            }
        }
    }

    /// Snapshot of every tracked agent, keyed by id.
    pub fn get_performance_stats(&self) -> BTreeMap<String, PerformanceStats> {
        self.registry
            .read()
            .by_id
            .iter()
            .map(|(id, perf)| (id.clone(), perf.stats()))
            .collect()
    }

    /// Agent of `agent_type` with the highest empirical success rate, or `None`.
    ///
    /// Ties go to the agent registered first.
    pub fn get_best_agent_for_type(&self, agent_type: AgentType) -> Option<String> {
        let registry = self.registry.read();
        let ids = registry.by_type.get(&agent_type)?;
        let mut best: Option<(&String, f64)> = None;
        for id in ids {
            let Some(perf) = registry.by_id.get(id) else {
                continue;
            };
            let rate = perf.success_rate();
            if best.map_or(true, |(_, top)| rate > top) {
                best = Some((id, rate));
            }
        }
        best.map(|(id, _)| id.clone())
    }
}

impl Default for ThompsonRouter {
    fn default() -> Self {
        Self::new(RouterConfig::default())
    }
}
