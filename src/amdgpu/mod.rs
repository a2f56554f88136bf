//! AMDGPU device images: kernel metadata notes and target-ID matching.

mod document;
mod metadata;
mod target_id;
mod verifier;

pub use document::{DocNode, DocumentError, decode_document};
pub use metadata::{
    AMDGPU_NOTE_OWNER, AmdgpuKernelMetaData, ImageMetadata, KernelMetadataMap,
    NT_AMDGPU_METADATA, kernel_metadata_from_document, read_kernel_metadata,
    read_kernel_metadata_with,
};
pub use target_id::{
    EF_AMDGPU_FEATURE_SRAMECC_ANY_V4, EF_AMDGPU_FEATURE_SRAMECC_OFF_V4,
    EF_AMDGPU_FEATURE_SRAMECC_ON_V4, EF_AMDGPU_FEATURE_SRAMECC_UNSUPPORTED_V4,
    EF_AMDGPU_FEATURE_SRAMECC_V4, EF_AMDGPU_FEATURE_XNACK_ANY_V4, EF_AMDGPU_FEATURE_XNACK_OFF_V4,
    EF_AMDGPU_FEATURE_XNACK_ON_V4, EF_AMDGPU_FEATURE_XNACK_UNSUPPORTED_V4,
    EF_AMDGPU_FEATURE_XNACK_V4, FeatureState, TargetId, TargetIdError,
    is_image_compatible_with_env,
};
pub use verifier::{HsaMetadataVerifier, MetadataVerifier, SchemaViolation};
