//! This crate provides tools for offline spike sorting of single-channel extracellular recordings.
//!
//! A recording goes through the following stages:
//!
//! 1. [`resample`]: optional downsampling by repeated integer decimation,
//! 2. [`filter`]: band-pass filtering to the spike band,
//! 3. [`detector`]: threshold-crossing detection, artifact rejection and waveform alignment,
//! 4. [`features`]: min-max scaling and principal component projection of the waveforms,
//! 5. [`kmeans`]: clustering of the projected waveforms into putative units.
//!
//! The [`pipeline`] module chains all stages together.
//!
//! # Detecting Spikes
//!
//! ```rust
//! use rusty_sort::detector::{detect, DetectorParams, RefractoryBaseline};
//!
//! // A flat trace with a single sharp deflection at sample 1000
//! let mut signal = vec![0.0; 4000];
//! for (i, x) in signal.iter_mut().enumerate() {
//!     let d = i as f64 - 1000.0;
//!     *x = 10.0 * (-d * d / 50.0).exp();
//! }
//!
//! let params = DetectorParams::build(80, 5.0, 40, 350.0, RefractoryBaseline::Unseeded).unwrap();
//! let detection = detect(&signal, &params).unwrap();
//!
//! assert_eq!(detection.sample_indices(), vec![1000]);
//! assert_eq!(detection.waveforms[0].len(), 160);
//! assert_eq!(detection.waveforms[0][40], 10.0);
//! ```
//!
//! # Clustering Waveforms
//!
//! ```rust
//! use rusty_sort::kmeans::KMeans;
//! use rand::SeedableRng;
//! use rand::rngs::StdRng;
//!
//! let data = vec![vec![0.0, 0.1], vec![0.1, 0.0], vec![9.9, 10.0], vec![10.0, 9.9]];
//!
//! let mut rng = StdRng::seed_from_u64(42);
//! let clustering = KMeans::build(2, 20).unwrap().fit(&data, &mut rng).unwrap();
//!
//! assert_eq!(clustering.num_clusters(), 2);
//! assert!(clustering.assignments.iter().all(|k| *k < 2));
//! ```
//!
//! # Sorting a Recording
//!
//! ```rust
//! use rusty_sort::pipeline::{SortConfig, SpikeSorter};
//! use rusty_sort::signal::Signal;
//!
//! let raw = Signal::build(vec![0.0; 10_000], 10_000.0).unwrap();
//! let sorter = SpikeSorter::build(SortConfig::default()).unwrap();
//!
//! // A silent recording is not an error
//! let result = sorter.run(&raw).unwrap();
//! assert!(result.is_empty());
//! ```

pub mod detector;
pub mod error;
pub mod features;
pub mod filter;
pub mod kmeans;
pub mod pipeline;
pub mod resample;
pub mod signal;
