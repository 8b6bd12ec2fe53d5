use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info, warn};
use rand::distributions::WeightedIndex;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};
use crate::fit::likelihood::Target;
use crate::fit::params::ParameterVector;

/// Tolerance on the temperature-jump probabilities summing to one.
const PROBABILITY_TOLERANCE: f64 = 1e-6;

// ---------------------------------------------------------------------------
// Proposal
// ---------------------------------------------------------------------------

/// Shape of the random-walk jump distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProposalConfig {
    /// Discrete temperature jumps (K), symmetric about zero.
    pub temperature_steps: Vec<f64>,
    /// Probability of each entry of `temperature_steps`.
    pub temperature_probabilities: Vec<f64>,
    /// Standard deviation of the radial-velocity jump (km/s).
    pub radial_velocity_sigma: f64,
    /// Standard deviation of the flux-prefactor jump.
    pub prefactor_sigma: f64,
}

impl Default for ProposalConfig {
    fn default() -> Self {
        Self {
            temperature_steps: vec![-300.0, -200.0, -100.0, 0.0, 100.0, 200.0, 300.0],
            temperature_probabilities: vec![
                0.00442619, 0.0539536, 0.24179206, 0.3996563, 0.24179206, 0.0539536, 0.00442619,
            ],
            radial_velocity_sigma: 0.3,
            prefactor_sigma: 0.01,
        }
    }
}

impl ProposalConfig {
    /// The jump distribution must be a symmetric probability mass function,
    /// otherwise the Metropolis ratio no longer satisfies detailed balance.
    pub fn validate(&self) -> ModelResult<()> {
        let steps = &self.temperature_steps;
        let probs = &self.temperature_probabilities;
        if steps.is_empty() || steps.len() != probs.len() {
            return Err(ModelError::ShapeMismatch {
                what: "temperature_probabilities",
                expected: steps.len(),
                found: probs.len(),
            });
        }
        if let Some(&bad) = probs.iter().find(|p| !(**p >= 0.0 && p.is_finite())) {
            return Err(ModelError::invalid("temperature_probabilities", bad, "must be >= 0"));
        }
        let total: f64 = probs.iter().sum();
        if (total - 1.0).abs() > PROBABILITY_TOLERANCE {
            return Err(ModelError::invalid(
                "temperature_probabilities",
                total,
                "must sum to 1",
            ));
        }
        let n = steps.len();
        for i in 0..n {
            if steps[i] != -steps[n - 1 - i] || probs[i] != probs[n - 1 - i] {
                return Err(ModelError::invalid(
                    "temperature_steps",
                    steps[i],
                    "jump distribution must be symmetric about zero",
                ));
            }
        }
        for (name, sigma) in [
            ("radial_velocity_sigma", self.radial_velocity_sigma),
            ("prefactor_sigma", self.prefactor_sigma),
        ] {
            if !(sigma >= 0.0 && sigma.is_finite()) {
                return Err(ModelError::invalid(name, sigma, "must be >= 0"));
            }
        }
        Ok(())
    }
}

/// Ready-to-sample form of [`ProposalConfig`].
#[derive(Debug, Clone)]
pub struct Proposal {
    temperature_steps: Vec<f64>,
    temperature: WeightedIndex<f64>,
    radial_velocity: Normal<f64>,
    prefactor: Normal<f64>,
}

impl Proposal {
    pub fn new(config: &ProposalConfig) -> ModelResult<Self> {
        config.validate()?;
        let temperature = WeightedIndex::new(&config.temperature_probabilities).map_err(|_| {
            ModelError::invalid("temperature_probabilities", 0.0, "not a valid distribution")
        })?;
        let radial_velocity = Normal::new(0.0, config.radial_velocity_sigma).map_err(|_| {
            ModelError::invalid("radial_velocity_sigma", config.radial_velocity_sigma, "invalid")
        })?;
        let prefactor = Normal::new(0.0, config.prefactor_sigma).map_err(|_| {
            ModelError::invalid("prefactor_sigma", config.prefactor_sigma, "invalid")
        })?;
        Ok(Self {
            temperature_steps: config.temperature_steps.clone(),
            temperature,
            radial_velocity,
            prefactor,
        })
    }

    /// Candidate = `current` + independent per-parameter jumps.
    pub fn jump<R: Rng + ?Sized>(&self, current: &ParameterVector, rng: &mut R) -> ParameterVector {
        let dt = self.temperature_steps[self.temperature.sample(rng)];
        let dvz = self.radial_velocity.sample(rng);
        let dpref = self.prefactor.sample(rng);
        ParameterVector {
            temperature: current.temperature + dt,
            radial_velocity: current.radial_velocity + dvz,
            flux_prefactor: current.flux_prefactor + dpref,
            ..*current
        }
    }
}

// ---------------------------------------------------------------------------
// Chain data
// ---------------------------------------------------------------------------

/// Current position of the chain together with its cached chi-square.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChainState {
    pub params: ParameterVector,
    pub chi_square: f64,
}

/// Outcome of one chain step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleRecord {
    pub step_index: usize,
    pub acceptance_ratio: f64,
    pub accepted: bool,
    /// Chain position after the step (the candidate if accepted).
    pub params: ParameterVector,
}

/// What to do when a candidate has no library spectrum.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissPolicy {
    /// Propagate the `LibraryMiss` and stop the run.
    #[default]
    Abort,
    /// Treat the candidate as having zero likelihood and reject it.
    Reject,
}

/// Metropolis ratio `exp(-(χ²_new − χ²_old) / 2)`.
pub fn acceptance_ratio(chi2_old: f64, chi2_new: f64) -> f64 {
    (-(chi2_new - chi2_old) / 2.0).exp()
}

// ---------------------------------------------------------------------------
// Sampler
// ---------------------------------------------------------------------------

/// Metropolis sampler over a chi-square [`Target`].
pub struct Sampler<T> {
    target: T,
    proposal: Proposal,
    miss_policy: MissPolicy,
}

impl<T: Target> Sampler<T> {
    pub fn new(target: T, proposal: &ProposalConfig) -> ModelResult<Self> {
        Ok(Self {
            target,
            proposal: Proposal::new(proposal)?,
            miss_policy: MissPolicy::default(),
        })
    }

    pub fn with_miss_policy(mut self, policy: MissPolicy) -> Self {
        self.miss_policy = policy;
        self
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    /// Evaluate the starting point.
    pub fn initialize(&self, initial: ParameterVector) -> ModelResult<ChainState> {
        if !initial.is_physical() {
            return Err(ModelError::invalid(
                "initial",
                initial.temperature,
                "starting parameters lie outside the physical domain",
            ));
        }
        Ok(ChainState {
            params: initial,
            chi_square: self.target.chi_square(&initial)?,
        })
    }

    /// One Metropolis transition from `state`.
    pub fn step<R: Rng + ?Sized>(
        &self,
        state: ChainState,
        step_index: usize,
        rng: &mut R,
    ) -> ModelResult<(ChainState, SampleRecord)> {
        let candidate = self.proposal.jump(&state.params, rng);

        let evaluated = if candidate.is_physical() {
            match self.target.chi_square(&candidate) {
                Ok(chi2) => Some(chi2),
                Err(ModelError::LibraryMiss { .. }) if self.miss_policy == MissPolicy::Reject => {
                    warn!("step {step_index}: no library spectrum for {candidate}, rejecting");
                    None
                }
                Err(e) => return Err(e),
            }
        } else {
            warn!("step {step_index}: proposal {candidate} outside physical domain, rejecting");
            None
        };

        let ratio = evaluated.map_or(0.0, |chi2| acceptance_ratio(state.chi_square, chi2));
        let accepted = match evaluated {
            Some(_) if ratio >= 1.0 => true,
            Some(_) if ratio > 0.0 => rng.gen::<f64>() < ratio,
            _ => false,
        };

        let next = match (accepted, evaluated) {
            (true, Some(chi2)) => ChainState {
                params: candidate,
                chi_square: chi2,
            },
            _ => state,
        };
        debug!(
            "step {step_index}: ratio {ratio:.4e}, {} -> {}",
            if accepted { "accepted" } else { "rejected" },
            next.params
        );

        Ok((
            next,
            SampleRecord {
                step_index,
                acceptance_ratio: ratio,
                accepted,
                params: next.params,
            },
        ))
    }

    /// Run `steps` transitions from `initial`.
    pub fn run_chain<R: Rng + ?Sized>(
        &self,
        initial: ParameterVector,
        steps: usize,
        rng: &mut R,
    ) -> ModelResult<ChainOutput> {
        let never = AtomicBool::new(false);
        self.run_chain_cancellable(initial, steps, rng, &never)
    }

    /// As [`Sampler::run_chain`], stopping early once `cancel` is set.
    ///
    /// `cancel` is checked between steps only.
    pub fn run_chain_cancellable<R: Rng + ?Sized>(
        &self,
        initial: ParameterVector,
        steps: usize,
        rng: &mut R,
        cancel: &AtomicBool,
    ) -> ModelResult<ChainOutput> {
        let mut chain = Chain::start(self, initial, steps)?;
        info!(
            "starting chain at {} (chi2 = {:.3}) for {steps} steps",
            initial,
            chain.state().chi_square
        );
        while chain.phase() != ChainPhase::Terminated {
            if cancel.load(Ordering::Relaxed) {
                warn!("chain cancelled after {} steps", chain.records().len());
                chain.cancel();
                break;
            }
            chain.advance(rng)?;
        }
        let output = chain.finish();
        info!(
            "chain finished: {} steps, acceptance {:.3}, best chi2 {:.3} at {}",
            output.summary.steps,
            output.summary.acceptance_fraction,
            output.summary.best.chi_square,
            output.summary.best.params
        );
        Ok(output)
    }
}

// ---------------------------------------------------------------------------
// Chain – explicit state machine around the sampler
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainPhase {
    Initialized,
    Stepping,
    Terminated,
}

/// A chain in progress: owns its state and history.
pub struct Chain<'s, T> {
    sampler: &'s Sampler<T>,
    state: ChainState,
    best: ChainState,
    records: Vec<SampleRecord>,
    budget: usize,
    phase: ChainPhase,
    cancelled: bool,
}

impl<'s, T: Target> Chain<'s, T> {
    /// Evaluate `initial` and prepare for `budget` steps.
    pub fn start(
        sampler: &'s Sampler<T>,
        initial: ParameterVector,
        budget: usize,
    ) -> ModelResult<Self> {
        let state = sampler.initialize(initial)?;
        Ok(Self {
            sampler,
            state,
            best: state,
            records: Vec::with_capacity(budget),
            budget,
            phase: if budget == 0 {
                ChainPhase::Terminated
            } else {
                ChainPhase::Initialized
            },
            cancelled: false,
        })
    }

    pub fn phase(&self) -> ChainPhase {
        self.phase
    }

    pub fn state(&self) -> &ChainState {
        &self.state
    }

    pub fn records(&self) -> &[SampleRecord] {
        &self.records
    }

    /// Take one step; `None` once the budget is spent.
    pub fn advance<R: Rng + ?Sized>(&mut self, rng: &mut R) -> ModelResult<Option<&SampleRecord>> {
        if self.phase == ChainPhase::Terminated {
            return Ok(None);
        }
        self.phase = ChainPhase::Stepping;

        let (next, record) = self.sampler.step(self.state, self.records.len(), rng)?;
        if next.chi_square < self.best.chi_square {
            self.best = next;
        }
        self.state = next;
        self.records.push(record);

        if self.records.len() >= self.budget {
            self.phase = ChainPhase::Terminated;
        }
        Ok(self.records.last())
    }

    fn cancel(&mut self) {
        self.cancelled = true;
        self.phase = ChainPhase::Terminated;
    }

    pub fn finish(self) -> ChainOutput {
        let accepted = self.records.iter().filter(|r| r.accepted).count();
        let steps = self.records.len();
        ChainOutput {
            summary: ChainSummary {
                steps,
                accepted,
                acceptance_fraction: if steps == 0 {
                    0.0
                } else {
                    accepted as f64 / steps as f64
                },
                best: self.best,
                cancelled: self.cancelled,
            },
            final_state: self.state,
            records: self.records,
        }
    }
}

/// Aggregate statistics of a finished chain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChainSummary {
    pub steps: usize,
    pub accepted: usize,
    pub acceptance_fraction: f64,
    /// Lowest chi-square state visited, including the start.
    pub best: ChainState,
    pub cancelled: bool,
}

/// Everything a run produces.
#[derive(Debug, Clone)]
pub struct ChainOutput {
    pub records: Vec<SampleRecord>,
    pub final_state: ChainState,
    pub summary: ChainSummary,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::cell::Cell;

    /// Quadratic bowl centered on (5800 K, -25 km/s, 1.0).
    struct Bowl {
        calls: Cell<usize>,
    }

    impl Bowl {
        fn new() -> Self {
            Self { calls: Cell::new(0) }
        }
    }

    impl Target for Bowl {
        fn chi_square(&self, p: &ParameterVector) -> ModelResult<f64> {
            self.calls.set(self.calls.get() + 1);
            Ok(((p.temperature - 5800.0) / 100.0).powi(2)
                + ((p.radial_velocity + 25.0) / 0.5).powi(2)
                + ((p.flux_prefactor - 1.0) / 0.02).powi(2))
        }
    }

    /// Library covering only 5600..=5800 K.
    struct Narrow;

    impl Target for Narrow {
        fn chi_square(&self, p: &ParameterVector) -> ModelResult<f64> {
            if (5600.0..=5800.0).contains(&p.temperature) {
                Ok(1.0)
            } else {
                Err(ModelError::LibraryMiss {
                    temperature: p.temperature,
                    surface_gravity: p.surface_gravity,
                })
            }
        }
    }

    fn start() -> ParameterVector {
        ParameterVector {
            temperature: 5700.0,
            radial_velocity: -30.0,
            flux_prefactor: 1.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_ratio_at_equal_chi2_is_one() {
        assert_eq!(acceptance_ratio(12.5, 12.5), 1.0);
        assert!(acceptance_ratio(10.0, 5.0) > 1.0);
        assert_relative_eq!(acceptance_ratio(0.0, 2.0), (-1.0f64).exp());
    }

    #[test]
    fn test_default_proposal_is_valid() {
        ProposalConfig::default().validate().unwrap();
    }

    #[test]
    fn test_asymmetric_proposal_rejected() {
        let mut config = ProposalConfig::default();
        config.temperature_probabilities = vec![0.1, 0.1, 0.1, 0.1, 0.2, 0.2, 0.2];
        assert!(config.validate().is_err());

        let mut config = ProposalConfig::default();
        config.temperature_probabilities[3] = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_jump_keeps_fixed_parameters() {
        let proposal = Proposal::new(&ProposalConfig::default()).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let current = start();
        for _ in 0..50 {
            let next = proposal.jump(&current, &mut rng);
            assert_eq!(next.rotational_velocity, current.rotational_velocity);
            assert_eq!(next.surface_gravity, current.surface_gravity);
            let dt = next.temperature - current.temperature;
            assert!(dt.abs() <= 300.0 && dt % 100.0 == 0.0);
        }
    }

    #[test]
    fn test_old_chi2_is_cached() {
        let sampler = Sampler::new(Bowl::new(), &ProposalConfig::default()).unwrap();
        let mut rng = StdRng::seed_from_u64(11);
        let out = sampler.run_chain(start(), 25, &mut rng).unwrap();
        // One evaluation for the start, one per candidate.
        assert_eq!(sampler.target().calls.get(), 26);
        assert_eq!(out.records.len(), 25);
    }

    #[test]
    fn test_records_follow_accepted_state() {
        let sampler = Sampler::new(Bowl::new(), &ProposalConfig::default()).unwrap();
        let mut rng = StdRng::seed_from_u64(5);
        let out = sampler.run_chain(start(), 40, &mut rng).unwrap();
        let mut previous = start();
        for (i, r) in out.records.iter().enumerate() {
            assert_eq!(r.step_index, i);
            assert!(r.acceptance_ratio >= 0.0);
            if !r.accepted {
                assert_eq!(r.params, previous);
            }
            if r.acceptance_ratio >= 1.0 {
                assert!(r.accepted);
            }
            previous = r.params;
        }
        assert_eq!(out.final_state.params, previous);
        assert!(out.summary.best.chi_square <= out.final_state.chi_square);
    }

    #[test]
    fn test_seeded_runs_are_identical() {
        let sampler = Sampler::new(Bowl::new(), &ProposalConfig::default()).unwrap();
        let a = sampler
            .run_chain(start(), 30, &mut StdRng::seed_from_u64(42))
            .unwrap();
        let b = sampler
            .run_chain(start(), 30, &mut StdRng::seed_from_u64(42))
            .unwrap();
        assert_eq!(a.records, b.records);
    }

    #[test]
    fn test_library_miss_aborts_by_default() {
        let sampler = Sampler::new(Narrow, &ProposalConfig::default()).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let err = sampler.run_chain(start(), 500, &mut rng).unwrap_err();
        assert!(matches!(err, ModelError::LibraryMiss { .. }));
    }

    #[test]
    fn test_library_miss_rejected_under_policy() {
        let sampler = Sampler::new(Narrow, &ProposalConfig::default())
            .unwrap()
            .with_miss_policy(MissPolicy::Reject);
        let mut rng = StdRng::seed_from_u64(1);
        let out = sampler.run_chain(start(), 500, &mut rng).unwrap();
        assert!(out
            .records
            .iter()
            .all(|r| (5600.0..=5800.0).contains(&r.params.temperature)));
        assert!(out.records.iter().any(|r| !r.accepted && r.acceptance_ratio == 0.0));
    }

    #[test]
    fn test_non_physical_proposal_rejected() {
        let config = ProposalConfig {
            prefactor_sigma: 5.0,
            ..Default::default()
        };
        let sampler = Sampler::new(Bowl::new(), &config).unwrap();
        let mut rng = StdRng::seed_from_u64(9);
        let out = sampler.run_chain(start(), 200, &mut rng).unwrap();
        assert!(out.records.iter().all(|r| r.params.flux_prefactor > 0.0));
    }

    #[test]
    fn test_cancelled_chain_stops() {
        let sampler = Sampler::new(Bowl::new(), &ProposalConfig::default()).unwrap();
        let cancel = AtomicBool::new(true);
        let out = sampler
            .run_chain_cancellable(start(), 10, &mut StdRng::seed_from_u64(0), &cancel)
            .unwrap();
        assert!(out.records.is_empty());
        assert!(out.summary.cancelled);
    }

    #[test]
    fn test_chain_phases() {
        let sampler = Sampler::new(Bowl::new(), &ProposalConfig::default()).unwrap();
        let mut rng = StdRng::seed_from_u64(2);
        let mut chain = Chain::start(&sampler, start(), 2).unwrap();
        assert_eq!(chain.phase(), ChainPhase::Initialized);
        assert!(chain.advance(&mut rng).unwrap().is_some());
        assert_eq!(chain.phase(), ChainPhase::Stepping);
        assert!(chain.advance(&mut rng).unwrap().is_some());
        assert_eq!(chain.phase(), ChainPhase::Terminated);
        assert!(chain.advance(&mut rng).unwrap().is_none());
        assert_eq!(chain.finish().records.len(), 2);
    }

    #[test]
    fn test_non_physical_start_rejected() {
        let sampler = Sampler::new(Bowl::new(), &ProposalConfig::default()).unwrap();
        let bad = ParameterVector {
            temperature: -1.0,
            ..start()
        };
        assert!(sampler.initialize(bad).is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_ratio_decreasing_in_new_chi2(old in 0.0f64..500.0, a in 0.0f64..500.0, d in 0.01f64..50.0) {
            prop_assert!(acceptance_ratio(old, a + d) < acceptance_ratio(old, a));
        }
    }
}
