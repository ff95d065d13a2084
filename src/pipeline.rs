//! End-to-end spike sorting: preprocessing, detection, feature reduction and clustering.
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use derivative::Derivative;
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::detector::{detect_with_reference, DetectorParams, SpikeEvent};
use crate::error::SortError;
use crate::features::reduce;
use crate::filter::bandpass;
use crate::kmeans::{Clustering, KMeans};
use crate::resample::downsample;
use crate::signal::Signal;

/// Configuration of a spike sorting run.
#[derive(Derivative, Serialize, Deserialize)]
#[derivative(Debug, PartialEq, Clone, Default)]
#[serde(default)]
pub struct SortConfig {
    /// The rate to downsample the recording to before filtering, if any.
    pub target_rate: Option<f64>,
    /// The lower edge of the pass band, in Hz.
    #[derivative(Default(value = "50.0"))]
    pub low_cutoff: f64,
    /// The upper edge of the pass band, in Hz.
    #[derivative(Default(value = "4000.0"))]
    pub high_cutoff: f64,
    /// The order of each edge of the band-pass filter.
    #[derivative(Default(value = "2"))]
    pub filter_order: usize,
    /// Whether to flip the polarity of the filtered trace, for negative-going spikes.
    #[derivative(Default(value = "true"))]
    pub invert: bool,
    /// The spike detector parameters.
    #[derivative(Default(value = "DetectorParams { offset: 40, ..Default::default() }"))]
    pub detector: DetectorParams,
    /// The number of principal components describing each waveform.
    #[derivative(Default(value = "20"))]
    pub num_components: usize,
    /// The number of putative units.
    #[derivative(Default(value = "6"))]
    pub num_clusters: usize,
    /// The number of k-means passes.
    #[derivative(Default(value = "200"))]
    pub max_steps: usize,
    /// The seed of the clustering random number generator.
    #[derivative(Default(value = "10"))]
    pub seed: u64,
}

impl SortConfig {
    /// Check the configuration before any processing.
    pub fn validate(&self) -> Result<(), SortError> {
        if let Some(rate) = self.target_rate {
            if !rate.is_finite() || rate <= 0.0 {
                return Err(SortError::InvalidParameter(format!(
                    "Target rate must be positive, got {}",
                    rate
                )));
            }
        }
        if !(self.low_cutoff > 0.0 && self.low_cutoff < self.high_cutoff) {
            return Err(SortError::InvalidParameter(format!(
                "Invalid pass band [{}, {}] Hz",
                self.low_cutoff, self.high_cutoff
            )));
        }
        if self.filter_order == 0 {
            return Err(SortError::InvalidParameter(
                "Filter order must be at least 1".to_string(),
            ));
        }
        if self.num_components == 0 {
            return Err(SortError::InvalidParameter(
                "Number of components must be positive".to_string(),
            ));
        }
        self.detector.validate()?;
        KMeans::build(self.num_clusters, self.max_steps)?;
        Ok(())
    }

    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<(), SortError> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, SortError> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let config: SortConfig = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }
}

/// The outcome of a spike sorting run.
/// Spikes, waveforms, features and assignments share the same ordering.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct SortResult {
    /// The sampling rate at which spikes were detected.
    pub sample_rate: f64,
    /// The detection threshold.
    pub threshold: f64,
    /// The detected spikes; amplitudes are read from the unfiltered trace.
    pub spikes: Vec<SpikeEvent>,
    /// The waveform of every spike, from the filtered trace.
    pub waveforms: Vec<Vec<f64>>,
    /// The reduced features of every spike.
    pub features: Vec<Vec<f64>>,
    /// The cluster of every spike, and the cluster centroids.
    pub clustering: Clustering,
}

impl SortResult {
    pub fn num_spikes(&self) -> usize {
        self.spikes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spikes.is_empty()
    }

    /// The spikes assigned to the cluster.
    pub fn cluster_spikes(&self, cluster_id: usize) -> Vec<&SpikeEvent> {
        self.clustering
            .members(cluster_id)
            .into_iter()
            .map(|i| &self.spikes[i])
            .collect()
    }

    /// The average waveform of the cluster, or `None` if it has no members.
    pub fn mean_waveform(&self, cluster_id: usize) -> Option<Vec<f64>> {
        let members = self.clustering.members(cluster_id);
        let len = self.waveforms.first()?.len();
        if members.is_empty() {
            return None;
        }
        let mut mean = vec![0.0; len];
        for i in members.iter() {
            mean.iter_mut()
                .zip(self.waveforms[*i].iter())
                .for_each(|(m, x)| *m += x);
        }
        mean.iter_mut().for_each(|m| *m /= members.len() as f64);
        Some(mean)
    }

    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<(), SortError> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, SortError> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }
}

/// Runs the full sorting pipeline on single-channel recordings.
#[derive(Debug, PartialEq, Clone)]
pub struct SpikeSorter {
    config: SortConfig,
}

impl SpikeSorter {
    /// Create a new sorter; the configuration is validated right away.
    pub fn build(config: SortConfig) -> Result<Self, SortError> {
        config.validate()?;
        Ok(SpikeSorter { config })
    }

    pub fn config(&self) -> &SortConfig {
        &self.config
    }

    /// Sort the recording, seeding the clustering from the configuration.
    pub fn run(&self, raw: &Signal) -> Result<SortResult, SortError> {
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        self.run_with_rng(raw, &mut rng)
    }

    /// Sort the recording with the provided random number generator.
    ///
    /// A recording without any spike yields an empty result rather than an error.
    pub fn run_with_rng<R: Rng>(&self, raw: &Signal, rng: &mut R) -> Result<SortResult, SortError> {
        let config = &self.config;

        let reference = match config.target_rate {
            Some(rate) => downsample(raw, rate)?,
            None => raw.clone(),
        };
        log::info!(
            "Preprocessing {} samples at {} Hz",
            reference.len(),
            reference.sample_rate()
        );

        let filtered = bandpass(
            &reference,
            config.low_cutoff,
            config.high_cutoff,
            config.filter_order,
        )?;
        let filtered = if config.invert {
            filtered.inverted()
        } else {
            filtered
        };

        let detection =
            detect_with_reference(filtered.samples(), reference.samples(), &config.detector)?;
        log::info!("Spike detection: {} spikes found", detection.len());

        if detection.is_empty() {
            log::warn!("No spike detected, skipping feature reduction and clustering");
            return Ok(SortResult {
                sample_rate: reference.sample_rate(),
                threshold: detection.threshold,
                spikes: vec![],
                waveforms: vec![],
                features: vec![],
                clustering: Clustering {
                    assignments: vec![],
                    centroids: vec![],
                },
            });
        }

        if detection.len() < config.num_clusters {
            return Err(SortError::InvalidParameter(format!(
                "Cannot form {} clusters from {} spikes",
                config.num_clusters,
                detection.len()
            )));
        }

        let max_components = detection
            .len()
            .min(detection.waveform_len().unwrap_or(0));
        let num_components = if config.num_components > max_components {
            log::warn!(
                "Reducing the number of components from {} to {}",
                config.num_components,
                max_components
            );
            max_components
        } else {
            config.num_components
        };
        let features = reduce(&detection.waveforms, num_components)?;
        log::info!("Feature reduction: {} components", num_components);

        let clustering = KMeans::build(config.num_clusters, config.max_steps)?.fit(&features, rng)?;
        log::info!(
            "Clustering: cluster sizes {:?}",
            clustering.cluster_sizes()
        );

        Ok(SortResult {
            sample_rate: reference.sample_rate(),
            threshold: detection.threshold,
            spikes: detection.spikes,
            waveforms: detection.waveforms,
            features,
            clustering,
        })
    }
}
