// Build Metadata
//
// Compile-time identity of the image: name, version, milestone and the
// banner logged when `kernel_init` brings the interrupt layer up. The
// compiled-in configuration switches are listed next to the banner so a boot
// log states which vector mapping and instrumentation the image carries.
//
// Implementation details:
// - `define_build_meta!` expands into `pub const` string slices built with
//   `concat!`, so a version bump is a single macro call
// - `feature_summary()` formats the enabled Cargo features without allocating

use core::fmt;

macro_rules! define_build_meta {
    ($kernel_name:literal, $version:literal, $milestone:literal, $build_date:literal) => {
        pub const KERNEL_NAME: &str = $kernel_name;
        pub const VERSION: &str = $version;
        pub const MILESTONE: &str = $milestone;
        pub const BUILD_DATE: &str = $build_date;

        pub const VERSION_TAG: &str = concat!($kernel_name, " v", $version);
        pub const BOOT_BANNER: &str = concat!($kernel_name, " v", $version, " - ", $milestone);
    };
}

define_build_meta!("Keel Kernel", "0.1.0", "Static Interrupt Wiring", "2026-10-15");

const SWITCHES: [(&str, bool); 5] = [
    ("fixed-irq-mapping", cfg!(feature = "fixed-irq-mapping")),
    ("debug-info", cfg!(feature = "debug-info")),
    ("int-latency-benchmark", cfg!(feature = "int-latency-benchmark")),
    ("aon-api-reentrancy", cfg!(feature = "aon-api-reentrancy")),
    ("device-power-management", cfg!(feature = "device-power-management")),
];

pub struct FeatureSummary;

impl fmt::Display for FeatureSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut enabled = SWITCHES.iter().filter(|(_, on)| *on).map(|(name, _)| *name);

        match enabled.next() {
            None => f.write_str("none"),
            Some(first) => {
                f.write_str(first)?;
                for name in enabled {
                    write!(f, ", {}", name)?;
                }
                Ok(())
            }
        }
    }
}

pub fn feature_summary() -> FeatureSummary {
    FeatureSummary
}
