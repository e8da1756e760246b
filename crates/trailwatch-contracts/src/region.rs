//! Regions the auditor walks by default.

/// Regions with bundled signing keys.
pub const SUPPORTED_REGIONS: [&str; 15] = [
    "ap-northeast-1",
    "ap-northeast-2",
    "ap-northeast-3",
    "ap-south-1",
    "ap-southeast-1",
    "ap-southeast-2",
    "ca-central-1",
    "eu-central-1",
    "eu-west-1",
    "eu-west-2",
    "sa-east-1",
    "us-east-1",
    "us-east-2",
    "us-west-1",
    "us-west-2",
];

/// Owned copy of [`SUPPORTED_REGIONS`].
pub fn supported_regions() -> Vec<String> {
    SUPPORTED_REGIONS.iter().map(|r| r.to_string()).collect()
}
