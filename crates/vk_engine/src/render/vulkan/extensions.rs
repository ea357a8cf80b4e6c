//! Instance extension, layer and device extension verification
//!
//! Required names are matched against what the driver enumerates. A name may pin an exact
//! spec version; a present name with a different version is still enabled, with a warning.

use ash::vk;
use std::ffi::{CStr, CString};
use std::fmt;

use super::{VulkanError, VulkanResult};
use crate::foundation::logging::targets;

/// What kind of driver feature a name refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequirementKind {
    /// Instance-level extension
    InstanceExtension,
    /// Instance layer
    Layer,
    /// Device-level extension
    DeviceExtension,
}

impl fmt::Display for RequirementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::InstanceExtension => "instance extension",
            Self::Layer => "layer",
            Self::DeviceExtension => "device extension",
        };
        f.write_str(label)
    }
}

/// A name the application needs, optionally pinned to a version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequiredName {
    /// Extension or layer name
    pub name: String,
    /// Exact spec version, or `None` for any
    pub version: Option<u32>,
}

impl RequiredName {
    /// Accept any version
    pub fn any(name: impl Into<String>) -> Self {
        Self { name: name.into(), version: None }
    }

    /// Ask for a specific version
    pub fn exact(name: impl Into<String>, version: u32) -> Self {
        Self { name: name.into(), version: Some(version) }
    }

    /// Build from a loader-provided name
    pub fn from_cstr(name: &CStr) -> Self {
        Self::any(name.to_string_lossy().into_owned())
    }
}

/// A name the driver reports as supported
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailableName {
    /// Extension or layer name
    pub name: String,
    /// Reported spec version
    pub version: u32,
}

impl AvailableName {
    /// Convert enumerated extension properties
    pub fn from_extensions(properties: &[vk::ExtensionProperties]) -> Vec<Self> {
        properties
            .iter()
            .map(|p| Self {
                name: fixed_str(&p.extension_name),
                version: p.spec_version,
            })
            .collect()
    }

    /// Convert enumerated layer properties
    pub fn from_layers(properties: &[vk::LayerProperties]) -> Vec<Self> {
        properties
            .iter()
            .map(|p| Self {
                name: fixed_str(&p.layer_name),
                version: p.spec_version,
            })
            .collect()
    }
}

fn fixed_str(raw: &[std::os::raw::c_char]) -> String {
    // SAFETY: the driver writes NUL-terminated names into fixed arrays
    unsafe { CStr::from_ptr(raw.as_ptr()) }.to_string_lossy().into_owned()
}

/// Check every required name against the available set
///
/// Returns the names to enable, in request order.
pub fn verify(
    kind: RequirementKind,
    required: &[RequiredName],
    available: &[AvailableName],
) -> VulkanResult<Vec<CString>> {
    let mut enabled = Vec::with_capacity(required.len());

    for req in required {
        let Some(found) = available.iter().find(|a| a.name == req.name) else {
            log::error!(target: targets::CONTEXT, "Missing {}: {}", kind, req.name);
            return Err(VulkanError::MissingRequirement {
                kind: kind.to_string(),
                name: req.name.clone(),
            });
        };

        match req.version {
            Some(version) if version != found.version => log::warn!(
                target: targets::CONTEXT,
                "Using {} {} with version {} (requested {})",
                kind,
                req.name,
                found.version,
                version
            ),
            _ => log::info!(target: targets::CONTEXT, "Using {}: {}", kind, req.name),
        }

        let name = CString::new(req.name.as_str()).map_err(|_| {
            VulkanError::InitializationFailed(format!("{} name contains NUL: {}", kind, req.name))
        })?;
        enabled.push(name);
    }

    Ok(enabled)
}
