use std::fmt::{Display, Formatter};
use std::time::Duration;

/// Resource consumption is sampled this often unless configured otherwise.
pub const DEFAULT_RESOURCE_CHECK_PERIOD: Duration = Duration::from_secs(3);

const BYTES_PER_MIB: u64 = 1024 * 1024;

/// Declared resource ceilings for a managed process, used to flag runaway processes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceSpec {
    /// Maximum expected CPU usage, in percent of one core. Zero disables the check.
    pub expected_max_cpu: f64,
    /// Maximum expected resident memory, in bytes. Zero disables the check.
    pub expected_max_ram: u64,
    /// How often consumption is sampled. Zero means [DEFAULT_RESOURCE_CHECK_PERIOD].
    pub resource_check_period: Duration,
}

impl Default for ResourceSpec {
    fn default() -> Self {
        Self {
            expected_max_cpu: 0.0,
            expected_max_ram: 0,
            resource_check_period: DEFAULT_RESOURCE_CHECK_PERIOD,
        }
    }
}

impl ResourceSpec {
    pub fn with_max_cpu(mut self, percent: f64) -> Self {
        self.expected_max_cpu = percent;
        self
    }

    pub fn with_max_ram(mut self, bytes: u64) -> Self {
        self.expected_max_ram = bytes;
        self
    }

    pub fn with_max_ram_mib(self, mib: u64) -> Self {
        self.with_max_ram(mib.saturating_mul(BYTES_PER_MIB))
    }

    pub fn with_check_period(mut self, period: Duration) -> Self {
        self.resource_check_period = period;
        self
    }

    /// A copy of this spec whose check period is no longer than `run_duration`.
    pub fn clamped_to(mut self, run_duration: Duration) -> Self {
        if self.resource_check_period.is_zero() {
            self.resource_check_period = DEFAULT_RESOURCE_CHECK_PERIOD;
        }
        self.resource_check_period = self.resource_check_period.min(run_duration);
        self
    }

    /// Compare a sample against the declared ceilings.
    pub fn check(&self, sample: &ResourceSample) -> Option<ResourceViolation> {
        if self.expected_max_cpu > 0.0 && sample.cpu_percent > self.expected_max_cpu {
            return Some(ResourceViolation::Cpu {
                observed: sample.cpu_percent,
                expected: self.expected_max_cpu,
            });
        }

        if self.expected_max_ram > 0 && sample.ram_bytes > self.expected_max_ram {
            return Some(ResourceViolation::Ram {
                observed: RamAmount(sample.ram_bytes),
                expected: RamAmount(self.expected_max_ram),
            });
        }

        None
    }
}

/// One point-in-time measurement of a process.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceSample {
    pub cpu_percent: f64,
    pub ram_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, derive_more::Display)]
pub enum ResourceViolation {
    #[display("CPU consumption is {observed:.1}%, max expected is {expected:.1}%")]
    Cpu { observed: f64, expected: f64 },
    #[display("RAM consumption is {observed}, max expected is {expected}")]
    Ram {
        observed: RamAmount,
        expected: RamAmount,
    },
}

/// An amount of memory in bytes, shown in whole MiB rounded up, or in bytes below one MiB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RamAmount(pub u64);

impl Display for RamAmount {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.0 < BYTES_PER_MIB {
            write!(f, "{} bytes", self.0)
        } else {
            write!(f, "{} MiB", self.0.div_ceil(BYTES_PER_MIB))
        }
    }
}

/// Accumulated consumption of one process over its lifetime.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceConsumption {
    name: String,
    samples: u64,
    cpu_percent_sum: f64,
    ram_mib_sum: u64,
    pub cpu_percent: f64,
    pub cpu_percent_max: f64,
    pub ram_mib: u64,
    pub ram_mib_max: u64,
}

impl ResourceConsumption {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn record(&mut self, sample: &ResourceSample) {
        let ram_mib = sample.ram_bytes / BYTES_PER_MIB;

        self.samples += 1;
        self.cpu_percent_sum += sample.cpu_percent;
        self.ram_mib_sum += ram_mib;

        self.cpu_percent = sample.cpu_percent;
        self.cpu_percent_max = self.cpu_percent_max.max(sample.cpu_percent);
        self.ram_mib = ram_mib;
        self.ram_mib_max = self.ram_mib_max.max(ram_mib);
    }

    pub fn sample_count(&self) -> u64 {
        self.samples
    }

    pub fn cpu_percent_avg(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.cpu_percent_sum / self.samples as f64
        }
    }

    pub fn ram_mib_avg(&self) -> u64 {
        self.ram_mib_sum.checked_div(self.samples).unwrap_or(0)
    }
}

impl Display for ResourceConsumption {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} RAM (RES): {:4} MiB, CPU: {:5.1}%",
            self.name, self.ram_mib, self.cpu_percent
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamped_period_never_exceeds_duration() {
        let periods = [0, 1, 500, 2_999, 3_000, 10_000, 60_000];
        let durations = [1, 10, 1_000, 2_000, 3_000, 15_000, 120_000];

        for period in periods {
            for duration in durations {
                let duration = Duration::from_millis(duration);
                let spec = ResourceSpec::default()
                    .with_check_period(Duration::from_millis(period))
                    .clamped_to(duration);

                assert!(spec.resource_check_period <= duration);
                assert!(!spec.resource_check_period.is_zero());
            }
        }
    }

    #[test]
    fn clamp_keeps_shorter_period() {
        let spec = ResourceSpec::default().clamped_to(Duration::from_secs(15));
        assert_eq!(DEFAULT_RESOURCE_CHECK_PERIOD, spec.resource_check_period);

        let spec = ResourceSpec::default().clamped_to(Duration::from_secs(2));
        assert_eq!(Duration::from_secs(2), spec.resource_check_period);
    }

    #[test]
    fn zero_limits_are_not_checked() {
        let sample = ResourceSample {
            cpu_percent: 900.0,
            ram_bytes: u64::MAX,
        };

        assert_eq!(None, ResourceSpec::default().check(&sample));
    }

    #[test]
    fn violations_are_reported() {
        let spec = ResourceSpec::default()
            .with_max_cpu(60.0)
            .with_max_ram_mib(200);

        let cpu = spec.check(&ResourceSample {
            cpu_percent: 75.0,
            ram_bytes: 10 * BYTES_PER_MIB,
        });
        assert_eq!(
            "CPU consumption is 75.0%, max expected is 60.0%",
            cpu.unwrap().to_string()
        );

        let ram = spec.check(&ResourceSample {
            cpu_percent: 5.0,
            ram_bytes: 300 * BYTES_PER_MIB,
        });
        assert_eq!(
            "RAM consumption is 300 MiB, max expected is 200 MiB",
            ram.unwrap().to_string()
        );
    }

    #[test]
    fn small_ram_limits_are_reported_exactly() {
        let spec = ResourceSpec::default().with_max_ram(1);

        let ram = spec.check(&ResourceSample {
            cpu_percent: 0.0,
            ram_bytes: 512,
        });
        assert_eq!(
            "RAM consumption is 512 bytes, max expected is 1 bytes",
            ram.unwrap().to_string()
        );

        let ram = spec.check(&ResourceSample {
            cpu_percent: 0.0,
            ram_bytes: 5 * BYTES_PER_MIB + 1,
        });
        assert_eq!(
            "RAM consumption is 6 MiB, max expected is 1 bytes",
            ram.unwrap().to_string()
        );
    }

    #[test]
    fn consumption_tracks_latest_average_and_max() {
        let mut consumption = ResourceConsumption::new("Agent");
        consumption.record(&ResourceSample {
            cpu_percent: 10.0,
            ram_bytes: 100 * BYTES_PER_MIB,
        });
        consumption.record(&ResourceSample {
            cpu_percent: 30.0,
            ram_bytes: 50 * BYTES_PER_MIB,
        });

        assert_eq!(2, consumption.sample_count());
        assert_eq!(30.0, consumption.cpu_percent);
        assert_eq!(30.0, consumption.cpu_percent_max);
        assert_eq!(20.0, consumption.cpu_percent_avg());
        assert_eq!(50, consumption.ram_mib);
        assert_eq!(100, consumption.ram_mib_max);
        assert_eq!(75, consumption.ram_mib_avg());
        assert_eq!(
            "Agent RAM (RES):   50 MiB, CPU:  30.0%",
            consumption.to_string()
        );
    }
}
