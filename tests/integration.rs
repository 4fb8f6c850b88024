//! End-to-end integration tests for knotfit.
//!
//! These exercise the pipeline from catalog loading through resolution,
//! assignment, the reselection audit and the resampling checks.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use knotfit::assignment::{AssignConfig, AssignmentTable};
use knotfit::catalog::{InvariantCatalog, InvariantRecord};
use knotfit::config::{ParamBag, RunConfig};
use knotfit::resample::{
    LinearModel, PolynomialModel, ResampleError, Tail, leave_one_out, permutation_test,
};
use knotfit::resolve::{
    FallbackPolicy, ReselectionAudit, ResolutionOutcome, Resolver, ResolverConfig, TargetSpec,
};
use knotfit::rules::{Rule, RuleChain};
use knotfit::run::AnalysisRun;
use knotfit::stats;
use knotfit::target::{LogLinearFormula, Observation, TargetValue};

fn abc_catalog() -> InvariantCatalog {
    InvariantCatalog::from_records(vec![
        InvariantRecord::new("A", 1, 6).with_determinant(4),
        InvariantRecord::new("B", 1, 6).with_determinant(5),
        InvariantRecord::new("C", 1, 8).with_determinant(4),
    ])
    .unwrap()
}

fn det4_spec(target: f64) -> TargetSpec {
    TargetSpec::new(TargetValue::scalar(target))
        .with_rules(RuleChain::new().with(Rule::determinant_divisible_by(4)))
        .with_fallback(FallbackPolicy::Unfiltered)
}

const CATALOG_JSON: &str = r#"[
    {"name": "3_1", "component_count": 1, "crossing_number": 3, "determinant": 3, "hyperbolic_volume": 0.0},
    {"name": "4_1", "component_count": 1, "crossing_number": 4, "determinant": 5, "hyperbolic_volume": 2.0299},
    {"name": "5_2", "component_count": 1, "crossing_number": 5, "determinant": 7, "hyperbolic_volume": 2.8281},
    {"name": "6_1#1", "component_count": 1, "crossing_number": 6, "determinant": 9, "hyperbolic_volume": 3.1640},
    {"name": "6_1#2", "component_count": 1, "crossing_number": 6, "determinant": 9, "hyperbolic_volume": 3.1640},
    {"name": "L2a1{0}", "component_count": 2, "crossing_number": 2, "determinant": 2}
]"#;

const RUN_TOML: &str = r#"
[assignment]
distinct_base_names = true
parallel = false

[resampling]
trials = 200
seed = 7

[hypothesis]
partition = "knots"
feature = "crossing_number"
fallback = "unfiltered"

[[hypothesis.rules]]
kind = "hyperbolic"

[params.formula]
slope = 1.0
anchor = 1.0
"#;

#[test]
fn filter_then_rank_then_leave_one_out_disagreement() {
    let full = abc_catalog();
    let resolver = Resolver::new(&full, ResolverConfig::default());

    let result = resolver.resolve(&det4_spec(6.0)).unwrap();
    assert_eq!(result.selected_name(), Some("A"));
    assert_eq!(result.filtered_count, 2);
    assert!(!result.fallback_triggered());

    let mut table = AssignmentTable::new();
    table.insert("p", result);

    // With A held out the same resolver must pick C, and the audit sees it.
    let audit = ReselectionAudit::leave_one_out(&table, |_| {
        let fold = full.without(&["A"]);
        Resolver::new(&fold, ResolverConfig::default()).resolve(&det4_spec(6.0))
    })
    .unwrap();
    assert_eq!(audit.disagreements.len(), 1);
    assert_eq!(audit.disagreements[0].refit.as_deref(), Some("C"));
}

#[test]
fn fallback_is_visible_in_the_result() {
    let fold = abc_catalog().without(&["A", "C"]);
    let resolver = Resolver::new(&fold, ResolverConfig::default());
    let result = resolver.resolve(&det4_spec(6.0)).unwrap();
    assert!(result.fallback_triggered());
    assert_eq!(result.filtered_count, 0);
    assert!(matches!(
        result.outcome,
        ResolutionOutcome::ResolvedViaFallback { ref record, .. } if record.name == "B"
    ));

    let strict = det4_spec(6.0).with_fallback(FallbackPolicy::None);
    let result = resolver.resolve(&strict).unwrap();
    assert!(!result.is_resolved());
    assert!(result.record().is_none());
}

#[test]
fn resolution_is_deterministic_across_runs() {
    let catalog = abc_catalog();
    let requests: Vec<(String, TargetSpec)> = (0..50)
        .map(|i| (format!("o{i}"), det4_spec(4.0 + f64::from(i % 7))))
        .collect();

    let sequential = AssignConfig {
        parallel: false,
        ..Default::default()
    };
    let parallel = AssignConfig {
        parallel: true,
        ..Default::default()
    };
    let resolver = Resolver::new(&catalog, ResolverConfig::default());
    let a = AssignmentTable::build(&resolver, requests.clone(), &sequential).unwrap();
    let b = AssignmentTable::build(&resolver, requests, &parallel).unwrap();
    assert_eq!(a, b);
}

#[test]
fn analysis_run_from_files() {
    let dir = tempfile::TempDir::new().unwrap();
    let config_path = dir.path().join("run.toml");
    std::fs::write(&config_path, RUN_TOML).unwrap();

    let catalog = InvariantCatalog::from_json_str(CATALOG_JSON).unwrap();
    assert_eq!(catalog.len(), 6);
    assert!(!catalog.lookup_exact("3_1").unwrap().is_hyperbolic());

    let config = RunConfig::load(&config_path).unwrap();
    let run = AnalysisRun::new(Arc::new(catalog), config).unwrap();

    let observations = vec![
        Observation::new("a", 3.0_f64.exp()),
        Observation::new("b", 4.0_f64.exp()),
        Observation::new("c", 6.0_f64.exp()),
        Observation::new("d", 6.0_f64.exp()),
        Observation::new("e", 0.0),
    ];
    let table = run
        .resolve_hypothesis(&observations, &LogLinearFormula::default())
        .unwrap();

    // 3_1 is not hyperbolic, so target 3 lands on 4_1.
    assert_eq!(table.get("a").unwrap().selected_name(), Some("4_1"));
    // 4_1 is taken; 5_2 is the nearest remaining hyperbolic knot.
    assert_eq!(table.get("b").unwrap().selected_name(), Some("5_2"));
    // Name breaks the tie between the two 6_1 variants.
    assert_eq!(table.get("c").unwrap().selected_name(), Some("6_1#1"));
    // Every hyperbolic base name is taken; only the unfiltered fallback answers.
    let d = table.get("d").unwrap();
    assert_eq!(d.selected_name(), Some("3_1"));
    assert!(d.fallback_triggered());
    // ln(0) is undefined.
    assert!(!table.get("e").unwrap().is_resolved());

    let summary = table.summary();
    assert_eq!(summary.total, 5);
    assert_eq!(summary.resolved_count, 3);
    assert_eq!(summary.fallback_count, 1);
    assert_eq!(summary.unresolved_count, 1);
    assert_eq!(summary.unique_base_name_count, 4);

    let audit = run
        .reselection_audit(&observations, &LogLinearFormula::default(), &table)
        .unwrap();
    assert!(!audit.is_stable());

    let json = serde_json::to_value(&table).unwrap();
    assert_eq!(json["entries"][3]["result"]["outcome"]["status"], "resolved_via_fallback");
}

#[test]
fn param_bag_is_read_only_input() {
    let params = ParamBag::from_toml_str("[formula]\nslope = 3.0\nanchor = 2.0\n").unwrap();
    let formula = LogLinearFormula::default();
    let obs = Observation::new("x", 2.0);
    let before = params.clone();
    let _ = knotfit::target::TargetFormula::target(&formula, &obs, &params).unwrap();
    assert_eq!(params, before);
}

// ---------------------------------------------------------------------------
// Resampling
// ---------------------------------------------------------------------------

fn noise(seed: u64, n: usize) -> (Vec<f64>, Vec<f64>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let x = (0..n).map(|_| rng.gen_range(0.0..1.0)).collect();
    let y = (0..n).map(|_| rng.gen_range(0.0..1.0)).collect();
    (x, y)
}

#[test]
fn permutation_p_values_are_calibrated_under_the_null() {
    let runs = 200;
    let mut p_values = Vec::with_capacity(runs);
    for seed in 0..runs as u64 {
        let (x, y) = noise(10_000 + seed, 15);
        let outcome =
            permutation_test(&x, &y, stats::pearson, 199, seed, Tail::Upper, false).unwrap();
        p_values.push(outcome.empirical_p_value);
    }
    let mean_p = stats::mean(&p_values).unwrap();
    let rejected = p_values.iter().filter(|&&p| p <= 0.05).count() as f64 / runs as f64;
    assert!((0.4..=0.6).contains(&mean_p), "mean p = {mean_p}");
    assert!(rejected < 0.15, "rejection rate = {rejected}");
}

#[test]
fn permutation_detects_a_real_association() {
    let (x, e) = noise(3, 30);
    let y: Vec<f64> = x.iter().zip(&e).map(|(x, e)| 2.0 * x + 0.1 * e).collect();
    let outcome = permutation_test(&x, &y, stats::pearson, 1000, 11, Tail::Upper, true).unwrap();
    assert!(outcome.observed_statistic > 0.9);
    assert!(outcome.empirical_p_value < 0.01);
    assert!(outcome.is_significant(0.05));
}

#[test]
fn parallel_and_sequential_trials_agree() {
    let (x, y) = noise(5, 20);
    let a = permutation_test(&x, &y, stats::pearson, 500, 42, Tail::TwoSided, false).unwrap();
    let b = permutation_test(&x, &y, stats::pearson, 500, 42, Tail::TwoSided, true).unwrap();
    assert_eq!(a, b);
}

#[test]
fn loo_exposes_overfitting_on_noise() {
    let (x, y) = noise(9, 10);
    let pairs: Vec<(f64, f64)> = x.into_iter().zip(y).collect();

    let line = leave_one_out(&LinearModel, &pairs, 2).unwrap();
    let cubic = leave_one_out(&PolynomialModel { degree: 3 }, &pairs, 2).unwrap();
    assert!(line.generalization_ratio > 1.0);
    assert!(cubic.generalization_ratio > 1.0);
    assert_eq!(cubic.free_parameters, 4);
}

#[test]
fn loo_refuses_to_fabricate_folds() {
    let pairs = vec![(1.0, 2.0), (2.0, 4.0)];
    let err = leave_one_out(&PolynomialModel { degree: 3 }, &pairs, 2).unwrap_err();
    assert!(matches!(err, ResampleError::InsufficientSample { .. }));
}
