use itertools::Itertools;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use tempfile::tempdir;

use rusty_sort::detector::{detect, DetectorParams, RefractoryBaseline};
use rusty_sort::error::SortError;
use rusty_sort::pipeline::{SortConfig, SortResult, SpikeSorter};
use rusty_sort::signal::Signal;

const SEED: u64 = 42;
const SAMPLE_RATE: f64 = 10_000.0;

/// The (negative-going) shape of each synthetic unit, as (amplitude, width) Gaussian lobes
/// relative to the spike time.
const UNITS: [&[(f64, f64, f64)]; 3] = [
    &[(-8.0, 0.0, 2.0)],
    &[(-14.0, 0.0, 5.0)],
    &[(-10.0, 0.0, 2.0), (6.0, 8.0, 3.0)],
];

/// A noisy recording with spikes of the three units every 300 samples.
/// Returns the recording and the planted (spike time, unit) pairs.
fn synthetic_recording<R: Rng>(
    num_spikes: usize,
    spacing: usize,
    upsampling: usize,
    rng: &mut R,
) -> (Vec<f64>, Vec<(usize, usize)>) {
    let n = (num_spikes + 4) * spacing * upsampling;
    let noise = Normal::new(0.0, 0.2).unwrap();
    let mut samples: Vec<f64> = (0..n).map(|_| noise.sample(rng)).collect();

    let planted: Vec<(usize, usize)> = (0..num_spikes)
        .map(|k| ((k + 2) * spacing * upsampling, rng.gen_range(0..UNITS.len())))
        .collect();

    for (time, unit) in planted.iter() {
        for (amplitude, shift, width) in UNITS[*unit].iter() {
            let center = *time as f64 + shift * upsampling as f64;
            let width = width * upsampling as f64;
            let start = time.saturating_sub(40 * upsampling);
            let end = (time + 40 * upsampling).min(n);
            for i in start..end {
                let d = i as f64 - center;
                samples[i] += amplitude * (-d * d / (2.0 * width * width)).exp();
            }
        }
    }
    (samples, planted)
}

/// The fraction of spikes whose cluster matches their unit under the best permutation.
fn accuracy(result: &SortResult, planted: &[(usize, usize)]) -> f64 {
    let k = result.clustering.num_clusters();
    (0..k)
        .permutations(k)
        .map(|perm| {
            result
                .clustering
                .assignments
                .iter()
                .zip(planted.iter())
                .filter(|(a, (_, unit))| perm[**a] == *unit)
                .count()
        })
        .max()
        .unwrap_or(0) as f64
        / planted.len() as f64
}

fn three_unit_config(seed: u64) -> SortConfig {
    SortConfig {
        num_components: 3,
        num_clusters: 3,
        max_steps: 100,
        seed,
        ..SortConfig::default()
    }
}

#[test]
fn test_sort_synthetic_units() {
    let mut rng = StdRng::seed_from_u64(SEED);
    let (samples, planted) = synthetic_recording(150, 300, 1, &mut rng);
    let raw = Signal::build(samples, SAMPLE_RATE).unwrap();

    let results: Vec<SortResult> = (0..10)
        .map(|seed| {
            SpikeSorter::build(three_unit_config(seed))
                .unwrap()
                .run(&raw)
                .unwrap()
        })
        .collect();

    // Detection does not depend on the clustering seed
    let result = &results[0];
    assert_eq!(result.num_spikes(), planted.len());
    assert!(results.iter().all(|r| r.spikes == result.spikes));

    for (spike, (time, _)) in result.spikes.iter().zip(planted.iter()) {
        assert!(spike.sample_index.abs_diff(*time) <= 3);
        assert!(spike.peak_amplitude < 0.0);
    }
    assert!(result
        .spikes
        .windows(2)
        .all(|s| s[1].sample_index - s[0].sample_index > 80));
    assert!(result.waveforms.iter().all(|w| w.len() == 160));
    assert!(result.features.iter().all(|f| f.len() == 3));
    assert_eq!(result.clustering.assignments.len(), result.num_spikes());
    assert_eq!(result.clustering.num_clusters(), 3);

    let best = results
        .iter()
        .min_by(|a, b| {
            a.clustering
                .inertia(&a.features)
                .total_cmp(&b.clustering.inertia(&b.features))
        })
        .unwrap();
    assert!(accuracy(best, &planted) >= 0.95);
}

#[test]
fn test_sort_is_reproducible() {
    let mut rng = StdRng::seed_from_u64(SEED);
    let (samples, _) = synthetic_recording(60, 300, 1, &mut rng);
    let raw = Signal::build(samples, SAMPLE_RATE).unwrap();

    let sorter = SpikeSorter::build(three_unit_config(7)).unwrap();
    assert_eq!(sorter.run(&raw).unwrap(), sorter.run(&raw).unwrap());
}

#[test]
fn test_sort_with_downsampling() {
    let mut rng = StdRng::seed_from_u64(SEED);
    let (samples, planted) = synthetic_recording(40, 300, 3, &mut rng);
    let raw = Signal::build(samples, 3.0 * SAMPLE_RATE).unwrap();

    let config = SortConfig {
        target_rate: Some(SAMPLE_RATE),
        ..three_unit_config(0)
    };
    let result = SpikeSorter::build(config).unwrap().run(&raw).unwrap();

    assert_eq!(result.sample_rate, SAMPLE_RATE);
    assert_eq!(result.num_spikes(), planted.len());
    for (spike, (time, _)) in result.spikes.iter().zip(planted.iter()) {
        assert!(spike.sample_index.abs_diff(time / 3) <= 3);
    }
}

#[test]
fn test_too_few_spikes() {
    let mut rng = StdRng::seed_from_u64(SEED);
    let (samples, _) = synthetic_recording(2, 300, 1, &mut rng);
    let raw = Signal::build(samples, SAMPLE_RATE).unwrap();

    let sorter = SpikeSorter::build(three_unit_config(0)).unwrap();
    assert!(matches!(
        sorter.run(&raw),
        Err(SortError::InvalidParameter(_))
    ));
}

#[test]
fn test_detection_idempotence_on_filtered_trace() {
    let mut rng = StdRng::seed_from_u64(SEED);
    let (samples, _) = synthetic_recording(30, 300, 1, &mut rng);
    let inverted: Vec<f64> = samples.iter().map(|x| -x).collect();
    let params = DetectorParams::build(80, 5.0, 40, 350.0, RefractoryBaseline::Unseeded).unwrap();

    let first = detect(&inverted, &params).unwrap();
    let second = detect(&inverted, &params).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.len(), 30);
}

#[test]
fn test_files_round_trip() {
    let dir = tempdir().unwrap();
    let mut rng = StdRng::seed_from_u64(SEED);
    let (samples, planted) = synthetic_recording(30, 300, 1, &mut rng);

    // Recording as a tab-delimited table, with a time column first
    let data_path = dir.path().join("recording.txt");
    let table = samples
        .iter()
        .enumerate()
        .map(|(i, x)| format!("{}\t{}", i as f64 / SAMPLE_RATE, x))
        .join("\n");
    std::fs::write(&data_path, table).unwrap();
    let raw = Signal::load_delimited(&data_path, '\t', 1, SAMPLE_RATE).unwrap();
    assert_eq!(raw.len(), samples.len());

    let config_path = dir.path().join("config.json");
    let config = three_unit_config(3);
    config.save_to(&config_path).unwrap();
    assert_eq!(SortConfig::load_from(&config_path).unwrap(), config);

    let result = SpikeSorter::build(config).unwrap().run(&raw).unwrap();
    assert_eq!(result.num_spikes(), planted.len());

    let result_path = dir.path().join("result.json");
    result.save_to(&result_path).unwrap();
    let loaded = SortResult::load_from(&result_path).unwrap();
    assert_eq!(loaded.spikes, result.spikes);
    assert_eq!(loaded.clustering.assignments, result.clustering.assignments);

    assert!(matches!(
        SortResult::load_from(dir.path().join("missing.json")),
        Err(SortError::IOError(_))
    ));
}
