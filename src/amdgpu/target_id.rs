//! AMDGPU target IDs and image/environment compatibility.
//!
//! A target ID names a processor plus the state of its `xnack` and `sramecc` features,
//! e.g. `gfx90a:sramecc+:xnack-`. Code object v4 images record the same states in `e_flags`.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

pub const EF_AMDGPU_FEATURE_XNACK_V4: u32 = 0x300;
pub const EF_AMDGPU_FEATURE_XNACK_UNSUPPORTED_V4: u32 = 0x000;
pub const EF_AMDGPU_FEATURE_XNACK_ANY_V4: u32 = 0x100;
pub const EF_AMDGPU_FEATURE_XNACK_OFF_V4: u32 = 0x200;
pub const EF_AMDGPU_FEATURE_XNACK_ON_V4: u32 = 0x300;

pub const EF_AMDGPU_FEATURE_SRAMECC_V4: u32 = 0xc00;
pub const EF_AMDGPU_FEATURE_SRAMECC_UNSUPPORTED_V4: u32 = 0x000;
pub const EF_AMDGPU_FEATURE_SRAMECC_ANY_V4: u32 = 0x400;
pub const EF_AMDGPU_FEATURE_SRAMECC_OFF_V4: u32 = 0x800;
pub const EF_AMDGPU_FEATURE_SRAMECC_ON_V4: u32 = 0xc00;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureState {
    Unsupported,
    #[default]
    Any,
    Off,
    On,
}

impl FeatureState {
    #[must_use]
    pub fn xnack_from_flags(flags: u32) -> Self {
        match flags & EF_AMDGPU_FEATURE_XNACK_V4 {
            EF_AMDGPU_FEATURE_XNACK_ANY_V4 => FeatureState::Any,
            EF_AMDGPU_FEATURE_XNACK_OFF_V4 => FeatureState::Off,
            EF_AMDGPU_FEATURE_XNACK_ON_V4 => FeatureState::On,
            _ => FeatureState::Unsupported,
        }
    }

    #[must_use]
    pub fn sramecc_from_flags(flags: u32) -> Self {
        match flags & EF_AMDGPU_FEATURE_SRAMECC_V4 {
            EF_AMDGPU_FEATURE_SRAMECC_ANY_V4 => FeatureState::Any,
            EF_AMDGPU_FEATURE_SRAMECC_OFF_V4 => FeatureState::Off,
            EF_AMDGPU_FEATURE_SRAMECC_ON_V4 => FeatureState::On,
            _ => FeatureState::Unsupported,
        }
    }

    fn suffix(self) -> Option<char> {
        match self {
            FeatureState::On => Some('+'),
            FeatureState::Off => Some('-'),
            FeatureState::Any | FeatureState::Unsupported => None,
        }
    }

    /// Whether an environment target ID satisfies this image-side state for `feature`.
    fn admits(self, feature: &str, env_target_id: &str) -> bool {
        match self.suffix() {
            Some(sign) => env_target_id.contains(&format!("{feature}{sign}")),
            None => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetId {
    pub arch: String,
    pub xnack: FeatureState,
    pub sramecc: FeatureState,
}

impl TargetId {
    /// Target ID described by an image's processor name and `e_flags`.
    #[must_use]
    pub fn from_image(arch: impl Into<String>, flags: u32) -> Self {
        Self {
            arch: arch.into(),
            xnack: FeatureState::xnack_from_flags(flags),
            sramecc: FeatureState::sramecc_from_flags(flags),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetIdError {
    MissingProcessor,
}

impl fmt::Display for TargetIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetIdError::MissingProcessor => f.write_str("target ID has no processor name"),
        }
    }
}

impl std::error::Error for TargetIdError {}

impl FromStr for TargetId {
    type Err = TargetIdError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let mut parts = text.trim().split(':');
        let arch = parts.next().unwrap_or_default();
        if arch.is_empty() {
            return Err(TargetIdError::MissingProcessor);
        }
        let mut target = TargetId {
            arch: arch.to_string(),
            xnack: FeatureState::Any,
            sramecc: FeatureState::Any,
        };
        for token in parts {
            match token {
                "xnack+" => target.xnack = FeatureState::On,
                "xnack-" => target.xnack = FeatureState::Off,
                "sramecc+" => target.sramecc = FeatureState::On,
                "sramecc-" => target.sramecc = FeatureState::Off,
                _ => {}
            }
        }
        Ok(target)
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.arch)?;
        if let Some(sign) = self.sramecc.suffix() {
            write!(f, ":sramecc{sign}")?;
        }
        if let Some(sign) = self.xnack.suffix() {
            write!(f, ":xnack{sign}")?;
        }
        Ok(())
    }
}

/// Whether an image built for `image_arch` with `image_flags` may run under `env_target_id`.
///
/// The processor must match exactly. A feature the image pins on or off must appear with the
/// same sign in the environment; `any` and unsupported features impose nothing.
#[must_use]
pub fn is_image_compatible_with_env(image_arch: &str, image_flags: u32, env_target_id: &str) -> bool {
    let env_arch = env_target_id.split(':').next().unwrap_or_default();
    if env_arch != image_arch {
        return false;
    }
    FeatureState::xnack_from_flags(image_flags).admits("xnack", env_target_id)
        && FeatureState::sramecc_from_flags(image_flags).admits("sramecc", env_target_id)
}
