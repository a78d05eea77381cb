//! Bandwidth-adaptive video quality control
//!
//! Samples achieved bandwidth every tick into a rolling window. When the
//! sample interval elapses the window's median picks a tier from a fixed
//! threshold table. The median resists single-sample spikes.

use serde::{Deserialize, Serialize};

/// One discrete bundle of capture/encode settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QualityTier {
    pub name: String,
    /// Median bandwidth (kbit/s) at or above which this tier is selected
    pub min_bandwidth_kbps: f32,
    pub width: u32,
    pub height: u32,
    pub bitrate_kbps: u32,
    pub framerate: u32,
}

impl QualityTier {
    pub fn new(
        name: impl Into<String>,
        min_bandwidth_kbps: f32,
        (width, height): (u32, u32),
        bitrate_kbps: u32,
        framerate: u32,
    ) -> Self {
        Self {
            name: name.into(),
            min_bandwidth_kbps,
            width,
            height,
            bitrate_kbps,
            framerate,
        }
    }
}

/// Threshold table and sampling interval.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Seconds of samples collected before a decision
    pub sample_interval: f32,
    /// Tiers in ascending `min_bandwidth_kbps` order
    pub tiers: Vec<QualityTier>,
    /// Index of the tier applied before the first decision
    pub initial_tier: usize,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            sample_interval: 5.0,
            tiers: vec![
                QualityTier::new("low", 0.0, (960, 540), 1_500, 30),
                QualityTier::new("medium", 3_000.0, (1280, 720), 3_000, 60),
                QualityTier::new("high", 6_000.0, (1920, 1080), 6_000, 60),
                QualityTier::new("ultra", 12_000.0, (2560, 1440), 12_000, 72),
            ],
            initial_tier: 1,
        }
    }
}

impl QualityConfig {
    /// Validate the table: non-empty, ascending thresholds, positive interval.
    pub fn validate(&self) -> Result<(), String> {
        if self.tiers.is_empty() {
            return Err("quality tier table is empty".into());
        }
        if !(self.sample_interval > 0.0) {
            return Err(format!("quality sample_interval must be > 0, got {}", self.sample_interval));
        }
        if self.tiers.windows(2).any(|w| w[0].min_bandwidth_kbps > w[1].min_bandwidth_kbps) {
            return Err("quality tiers must be sorted by min_bandwidth_kbps".into());
        }
        if self.initial_tier >= self.tiers.len() {
            return Err(format!("initial_tier {} out of range", self.initial_tier));
        }
        Ok(())
    }

    /// Highest tier whose threshold the bandwidth meets; the lowest tier otherwise.
    pub fn tier_for(&self, bandwidth_kbps: f32) -> usize {
        self.tiers
            .iter()
            .rposition(|t| bandwidth_kbps >= t.min_bandwidth_kbps)
            .unwrap_or(0)
    }
}

/// Median of a sample window.
///
/// Even counts average the two central values; an empty window is 0.
pub fn median(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) * 0.5
    } else {
        sorted[mid]
    }
}

/// Per-client quality control loop.
#[derive(Clone, Debug)]
pub struct QualityController {
    config: QualityConfig,
    window: Vec<f32>,
    elapsed: f32,
    current: usize,
    /// Set when a new tier is applied; the encoder reconfigures and clears it.
    reconfigure_pending: bool,
}

impl QualityController {
    pub fn new(config: QualityConfig) -> Self {
        let current = config.initial_tier.min(config.tiers.len().saturating_sub(1));
        Self {
            config,
            window: Vec::new(),
            elapsed: 0.0,
            current,
            reconfigure_pending: false,
        }
    }

    /// Feed one bandwidth sample covering `delta_secs`.
    ///
    /// Returns the new tier when the decision changed it.
    pub fn sample(&mut self, bandwidth_kbps: f32, delta_secs: f32) -> Option<&QualityTier> {
        if bandwidth_kbps.is_finite() {
            self.window.push(bandwidth_kbps.max(0.0));
        }
        self.elapsed += delta_secs.max(0.0);
        if self.elapsed < self.config.sample_interval {
            return None;
        }

        let median = median(&self.window);
        self.window.clear();
        self.elapsed = 0.0;

        let tier = self.config.tier_for(median);
        log::debug!("Bandwidth median {:.0} kbps -> tier {}", median, tier);
        if self.apply(tier) {
            self.config.tiers.get(self.current)
        } else {
            None
        }
    }

    /// Switch to tier `index`. Applying the current tier again is a no-op.
    pub fn apply(&mut self, index: usize) -> bool {
        if index == self.current || index >= self.config.tiers.len() {
            return false;
        }
        let from = &self.config.tiers[self.current].name;
        let to = &self.config.tiers[index].name;
        log::info!("Quality tier {} -> {}", from, to);
        self.current = index;
        self.reconfigure_pending = true;
        true
    }

    pub fn current_tier(&self) -> &QualityTier {
        &self.config.tiers[self.current]
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    /// Consume the encoder reconfiguration flag.
    pub fn take_reconfigure(&mut self) -> bool {
        std::mem::take(&mut self.reconfigure_pending)
    }

    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    pub fn config(&self) -> &QualityConfig {
        &self.config
    }
}
