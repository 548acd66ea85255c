//! Scalar resource vectors.

use serde::{Deserialize, Serialize};

/// Tolerance for resource comparisons.
///
/// Floating point drift accumulates as gangs are admitted and returned;
/// anything below this is treated as zero.
pub const EPSILON: f64 = 1e-9;

/// The resource dimensions tracked for every pool and task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Cpu,
    Mem,
    Disk,
    Gpu,
}

impl ResourceKind {
    /// All dimensions, in canonical iteration order.
    pub const ALL: [ResourceKind; 4] = [
        ResourceKind::Cpu,
        ResourceKind::Mem,
        ResourceKind::Disk,
        ResourceKind::Gpu,
    ];

    /// Canonical lowercase name, matching the persisted form.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Cpu => "cpu",
            ResourceKind::Mem => "memory",
            ResourceKind::Disk => "disk",
            ResourceKind::Gpu => "gpu",
        }
    }
}

/// A non-negative quantity of each resource dimension.
///
/// CPU and GPU are in cores, memory and disk in megabytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Resources {
    pub cpu: f64,
    pub mem: f64,
    pub disk: f64,
    pub gpu: f64,
}

fn le_with_tolerance(a: f64, b: f64) -> bool {
    let v = a - b;
    v.abs() < EPSILON || v < 0.0
}

impl Resources {
    /// The zero vector.
    pub const ZERO: Resources = Resources {
        cpu: 0.0,
        mem: 0.0,
        disk: 0.0,
        gpu: 0.0,
    };

    /// Creates a resource vector from explicit dimensions.
    #[must_use]
    pub const fn new(cpu: f64, mem: f64, disk: f64, gpu: f64) -> Self {
        Self {
            cpu,
            mem,
            disk,
            gpu,
        }
    }

    /// Returns the quantity of one dimension.
    #[must_use]
    pub fn get(&self, kind: ResourceKind) -> f64 {
        match kind {
            ResourceKind::Cpu => self.cpu,
            ResourceKind::Mem => self.mem,
            ResourceKind::Disk => self.disk,
            ResourceKind::Gpu => self.gpu,
        }
    }

    /// Sets the quantity of one dimension.
    pub fn set(&mut self, kind: ResourceKind, value: f64) {
        match kind {
            ResourceKind::Cpu => self.cpu = value,
            ResourceKind::Mem => self.mem = value,
            ResourceKind::Disk => self.disk = value,
            ResourceKind::Gpu => self.gpu = value,
        }
    }

    /// Component-wise sum.
    #[must_use]
    pub fn add(&self, other: &Resources) -> Resources {
        Resources {
            cpu: self.cpu + other.cpu,
            mem: self.mem + other.mem,
            disk: self.disk + other.disk,
            gpu: self.gpu + other.gpu,
        }
    }

    /// Component-wise difference, saturating at zero.
    ///
    /// Residues smaller than [`EPSILON`] clamp to zero.
    #[must_use]
    pub fn subtract(&self, other: &Resources) -> Resources {
        let mut result = Resources::ZERO;
        for kind in ResourceKind::ALL {
            let have = self.get(kind);
            let take = other.get(kind);
            if have < take {
                continue; // stays zero
            }
            let mut left = have - take;
            if left < EPSILON {
                left = 0.0;
            }
            result.set(kind, left);
        }
        result
    }

    /// True if every dimension is ≤ the other's, within tolerance.
    #[must_use]
    pub fn less_than_or_equal(&self, other: &Resources) -> bool {
        le_with_tolerance(self.cpu, other.cpu)
            && le_with_tolerance(self.mem, other.mem)
            && le_with_tolerance(self.disk, other.disk)
            && le_with_tolerance(self.gpu, other.gpu)
    }

    /// True if every dimension matches within tolerance.
    #[must_use]
    pub fn equal(&self, other: &Resources) -> bool {
        ResourceKind::ALL
            .iter()
            .all(|&k| (self.get(k) - other.get(k)).abs() < EPSILON)
    }

    /// Sums a sequence of resource vectors.
    #[must_use]
    pub fn sum<'a>(items: impl IntoIterator<Item = &'a Resources>) -> Resources {
        items
            .into_iter()
            .fold(Resources::ZERO, |acc, r| acc.add(r))
    }
}

impl std::fmt::Display for Resources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "cpu:{} mem:{} disk:{} gpu:{}",
            self.cpu, self.mem, self.disk, self.gpu
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_subtract() {
        let a = Resources::new(2.0, 4096.0, 100.0, 0.0);
        let b = Resources::new(1.0, 1024.0, 50.0, 1.0);

        let sum = a.add(&b);
        assert_eq!(sum, Resources::new(3.0, 5120.0, 150.0, 1.0));

        let diff = sum.subtract(&b);
        assert!(diff.equal(&a));
    }

    #[test]
    fn subtract_saturates_at_zero() {
        let small = Resources::new(1.0, 100.0, 0.0, 0.0);
        let large = Resources::new(4.0, 4096.0, 10.0, 1.0);
        assert_eq!(small.subtract(&large), Resources::ZERO);
    }

    #[test]
    fn subtract_clamps_residue_below_epsilon() {
        let a = Resources::new(0.3, 0.0, 0.0, 0.0);
        let b = Resources::new(0.1, 0.0, 0.0, 0.0);
        let drained = a.subtract(&b).subtract(&b).subtract(&b);
        assert_eq!(drained.cpu, 0.0);
    }

    #[test]
    fn comparison_uses_tolerance() {
        let a = Resources::new(1.0 + 1e-12, 0.0, 0.0, 0.0);
        let b = Resources::new(1.0, 0.0, 0.0, 0.0);
        assert!(a.less_than_or_equal(&b));
        assert!(a.equal(&b));

        let c = Resources::new(1.1, 0.0, 0.0, 0.0);
        assert!(!c.less_than_or_equal(&b));
    }

    #[test]
    fn get_set_by_kind() {
        let mut r = Resources::ZERO;
        for (i, kind) in ResourceKind::ALL.into_iter().enumerate() {
            r.set(kind, i as f64 + 1.0);
        }
        assert_eq!(r, Resources::new(1.0, 2.0, 3.0, 4.0));
        assert_eq!(r.get(ResourceKind::Disk), 3.0);
    }
}
