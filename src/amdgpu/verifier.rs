//! Schema checks applied to AMDGPU metadata documents before extraction.

use std::fmt;

use super::document::DocNode;

/// Accept or reject a decoded document. Verifiers never repair input.
pub trait MetadataVerifier {
    /// # Errors
    ///
    /// Returns the first [`SchemaViolation`] found in `root`.
    fn verify(&self, root: &DocNode) -> Result<(), SchemaViolation>;
}

impl<V: MetadataVerifier + ?Sized> MetadataVerifier for &V {
    fn verify(&self, root: &DocNode) -> Result<(), SchemaViolation> {
        (**self).verify(root)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    pub path: String,
    pub message: String,
}

impl SchemaViolation {
    fn new(path: &str, message: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

impl std::error::Error for SchemaViolation {}

/// Strict HSA code object (v3 and later) metadata schema.
#[derive(Debug, Clone, Copy, Default)]
pub struct HsaMetadataVerifier;

#[derive(Debug, Clone, Copy)]
enum Expect {
    Integer,
    Boolean,
    String,
    Integers(usize),
    OneOf(&'static [&'static str]),
    ValueKind,
}

struct Rule {
    key: &'static str,
    required: bool,
    expect: Expect,
}

const fn required(key: &'static str, expect: Expect) -> Rule {
    Rule {
        key,
        required: true,
        expect,
    }
}

const fn optional(key: &'static str, expect: Expect) -> Rule {
    Rule {
        key,
        required: false,
        expect,
    }
}

const LANGUAGES: &[&str] = &["OpenCL C", "OpenCL C++", "HCC", "HIP", "OpenMP", "Assembler"];
const ADDRESS_SPACES: &[&str] = &["private", "global", "constant", "local", "generic", "region"];
const ACCESS: &[&str] = &["read_only", "write_only", "read_write"];
const VALUE_KINDS: &[&str] = &[
    "by_value",
    "global_buffer",
    "dynamic_shared_pointer",
    "sampler",
    "image",
    "pipe",
    "queue",
];

const KERNEL_RULES: &[Rule] = &[
    required(".name", Expect::String),
    required(".symbol", Expect::String),
    optional(".language", Expect::OneOf(LANGUAGES)),
    optional(".language_version", Expect::Integers(2)),
    optional(".reqd_workgroup_size", Expect::Integers(3)),
    optional(".workgroup_size_hint", Expect::Integers(3)),
    optional(".vec_type_hint", Expect::String),
    optional(".device_enqueue_symbol", Expect::String),
    required(".kernarg_segment_size", Expect::Integer),
    required(".group_segment_fixed_size", Expect::Integer),
    required(".private_segment_fixed_size", Expect::Integer),
    optional(".uses_dynamic_stack", Expect::Boolean),
    optional(".workgroup_processor_mode", Expect::Integer),
    required(".kernarg_segment_align", Expect::Integer),
    required(".wavefront_size", Expect::Integer),
    required(".sgpr_count", Expect::Integer),
    required(".vgpr_count", Expect::Integer),
    required(".max_flat_workgroup_size", Expect::Integer),
    optional(".sgpr_spill_count", Expect::Integer),
    optional(".vgpr_spill_count", Expect::Integer),
    optional(".agpr_count", Expect::Integer),
    optional(".uniform_work_group_size", Expect::Integer),
];

const ARG_RULES: &[Rule] = &[
    optional(".name", Expect::String),
    optional(".type_name", Expect::String),
    required(".size", Expect::Integer),
    required(".offset", Expect::Integer),
    required(".value_kind", Expect::ValueKind),
    optional(".pointee_align", Expect::Integer),
    optional(".address_space", Expect::OneOf(ADDRESS_SPACES)),
    optional(".access", Expect::OneOf(ACCESS)),
    optional(".actual_access", Expect::OneOf(ACCESS)),
    optional(".is_const", Expect::Boolean),
    optional(".is_restrict", Expect::Boolean),
    optional(".is_volatile", Expect::Boolean),
    optional(".is_pipe", Expect::Boolean),
];

impl MetadataVerifier for HsaMetadataVerifier {
    fn verify(&self, root: &DocNode) -> Result<(), SchemaViolation> {
        if root.as_map().is_none() {
            return Err(SchemaViolation::new("<root>", "expected a map"));
        }
        check_value(
            "amdhsa.version",
            root.get("amdhsa.version"),
            true,
            Expect::Integers(2),
        )?;
        if let Some(printf) = root.get("amdhsa.printf") {
            let items = printf
                .as_array()
                .ok_or_else(|| SchemaViolation::new("amdhsa.printf", "expected an array"))?;
            if items.iter().any(|item| item.as_str().is_none()) {
                return Err(SchemaViolation::new(
                    "amdhsa.printf",
                    "expected an array of strings",
                ));
            }
        }

        let kernels = root
            .get("amdhsa.kernels")
            .ok_or_else(|| SchemaViolation::new("amdhsa.kernels", "missing required key"))?
            .as_array()
            .ok_or_else(|| SchemaViolation::new("amdhsa.kernels", "expected an array"))?;
        for (index, kernel) in kernels.iter().enumerate() {
            let path = format!("amdhsa.kernels[{index}]");
            verify_kernel(kernel, &path)?;
        }
        Ok(())
    }
}

fn verify_kernel(kernel: &DocNode, path: &str) -> Result<(), SchemaViolation> {
    check_rules(kernel, KERNEL_RULES, path)?;
    if let Some(args) = kernel.get(".args") {
        let args = args
            .as_array()
            .ok_or_else(|| SchemaViolation::new(&format!("{path}.args"), "expected an array"))?;
        for (index, arg) in args.iter().enumerate() {
            check_rules(arg, ARG_RULES, &format!("{path}.args[{index}]"))?;
        }
    }
    Ok(())
}

fn check_rules(node: &DocNode, rules: &[Rule], path: &str) -> Result<(), SchemaViolation> {
    if node.as_map().is_none() {
        return Err(SchemaViolation::new(path, "expected a map"));
    }
    for rule in rules {
        let key_path = format!("{path}{}", rule.key);
        check_value(&key_path, node.get(rule.key), rule.required, rule.expect)?;
    }
    Ok(())
}

fn check_value(
    path: &str,
    value: Option<&DocNode>,
    required: bool,
    expect: Expect,
) -> Result<(), SchemaViolation> {
    let Some(value) = value else {
        return if required {
            Err(SchemaViolation::new(path, "missing required key"))
        } else {
            Ok(())
        };
    };
    let accepted = match expect {
        Expect::Integer => value.is_integer(),
        Expect::Boolean => value.as_bool().is_some(),
        Expect::String => value.as_str().is_some(),
        Expect::Integers(count) => value
            .as_array()
            .is_some_and(|items| items.len() == count && items.iter().all(DocNode::is_integer)),
        Expect::OneOf(allowed) => value.as_str().is_some_and(|text| allowed.contains(&text)),
        Expect::ValueKind => value
            .as_str()
            .is_some_and(|kind| VALUE_KINDS.contains(&kind) || kind.starts_with("hidden_")),
    };
    if accepted {
        Ok(())
    } else {
        Err(SchemaViolation::new(
            path,
            format!("unexpected {} value", value.kind()),
        ))
    }
}
