//! Provider detection and deployment name resolution

pub mod deployment;
pub mod detection;

pub use deployment::{DeploymentResolver, ResolverStats, match_family};
pub use detection::{
    BaseUrlStrategy, DetectionInput, DetectionStrategy, EnvironmentStrategy, ProviderDescriptor,
    ProviderDetector, ProviderKind, TypeNameStrategy,
};

/// Model id used for pricing.
///
/// Hosted deployments are resolved to their model family; the primary vendor
/// already reports canonical ids.
pub fn pricing_model(
    descriptor: &ProviderDescriptor,
    resolver: &DeploymentResolver,
    reported: &str,
) -> String {
    if descriptor.is_hosted_variant {
        resolver.resolve(reported)
    } else {
        reported.to_string()
    }
}
