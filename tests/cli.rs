mod common;

use std::fs;

use assert_cmd::Command;
use expect_test::expect;
use object::{Object, ObjectSection, ObjectSymbol};
use offloading::entry::{EntryLayout, decode_entry_table};
use predicates::prelude::PredicateBooleanExt;
use predicates::str::contains;
use tempfile::tempdir;

fn offloading_cmd() -> Command {
    let mut cmd = Command::cargo_bin("offloading").expect("offloading binary");
    cmd.env_remove("OFFLOAD_ENTRY_SECTION")
        .env_remove("OFFLOAD_ENV_TARGET");
    cmd
}

#[test]
fn help_and_version_commands() {
    offloading_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("Usage: offloading"));

    offloading_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(contains("offloading "));

    offloading_cmd()
        .assert()
        .failure()
        .stderr(contains("missing command"));
}

#[test]
fn inspect_reports_kernels_and_compatibility() {
    let dir = tempdir().expect("tempdir");
    let image = dir.path().join("vec_add.hsaco");
    common::write_code_object(&image, &common::vec_add_metadata(), common::GFX90A_XNACK_OFF);

    let output = offloading_cmd()
        .current_dir(dir.path())
        .args(["inspect", image.to_str().expect("utf8 path")])
        .args(["--arch", "gfx90a", "--env", "gfx90a:xnack-"])
        .output()
        .expect("run inspect");
    assert!(output.status.success(), "{output:?}");

    let stdout = String::from_utf8(output.stdout).expect("utf8 stdout");
    expect![[r#"
        {
          "abi_version": 2,
          "flags": 575,
          "target_id": "gfx90a:xnack-",
          "env_target_id": "gfx90a:xnack-",
          "compatible": true,
          "kernels": {
            "vec_add": {
              "sgpr_count": 24,
              "sgpr_spill_count": 0,
              "vgpr_count": 32,
              "vgpr_spill_count": 0,
              "agpr_count": 4,
              "private_segment_size": 16,
              "group_segment_size": 256,
              "requested_workgroup_size": [
                256,
                1,
                1
              ],
              "workgroup_size_hint": [
                0,
                0,
                0
              ],
              "wavefront_size": 64,
              "max_flat_workgroup_size": 256
            }
          }
        }
    "#]]
    .assert_eq(&stdout);
}

#[test]
fn inspect_reads_environment_target_from_env() {
    let dir = tempdir().expect("tempdir");
    let image = dir.path().join("vec_add.hsaco");
    common::write_code_object(&image, &common::vec_add_metadata(), common::GFX90A_XNACK_OFF);

    offloading_cmd()
        .current_dir(dir.path())
        .env("OFFLOAD_ENV_TARGET", "gfx90a:xnack+")
        .args(["inspect", image.to_str().expect("utf8 path"), "--arch", "gfx90a"])
        .assert()
        .success()
        .stdout(contains("\"compatible\": false"));

    offloading_cmd()
        .current_dir(dir.path())
        .args(["inspect", image.to_str().expect("utf8 path")])
        .assert()
        .success()
        .stdout(contains("\"vec_add\"").and(contains("compatible").not()));
}

#[test]
fn inspect_rejects_non_elf_input() {
    let dir = tempdir().expect("tempdir");
    let image = dir.path().join("garbage.bin");
    fs::write(&image, b"definitely not an object").expect("write input");

    offloading_cmd()
        .current_dir(dir.path())
        .args(["inspect", image.to_str().expect("utf8 path")])
        .assert()
        .failure()
        .stderr(contains("error: malformed object"));
}

#[test]
fn wrap_writes_spirv_container() {
    let dir = tempdir().expect("tempdir");
    let image = dir.path().join("kernel.spv");
    let output = dir.path().join("kernel.o");
    let spirv = b"\x03\x02\x23\x07\x00\x00\x01\x00spirv body".to_vec();
    fs::write(&image, &spirv).expect("write image");

    offloading_cmd()
        .args(["wrap", image.to_str().expect("utf8 path"), "-o"])
        .arg(&output)
        .assert()
        .success();

    let bytes = fs::read(&output).expect("read container");
    let file = object::File::parse(&*bytes).expect("parse container");
    let section = file
        .section_by_name("__openmp_offload_spirv_0")
        .expect("image section");
    assert_eq!(section.data().expect("image data"), spirv.as_slice());
    assert!(file.section_by_name(".note.inteloneompoffload").is_some());
}

#[test]
fn emit_entries_writes_bounded_table() {
    let dir = tempdir().expect("tempdir");
    let output = dir.path().join("entries.o");

    offloading_cmd()
        .current_dir(dir.path())
        .args([
            "emit-entries",
            "--target",
            "x86_64-unknown-linux-gnu",
            "--section",
            "omp_offloading_entries",
            "-o",
        ])
        .arg(&output)
        .args(["vec_add", "reduce"])
        .assert()
        .success();

    let bytes = fs::read(&output).expect("read object");
    let file = object::File::parse(&*bytes).expect("parse object");
    let section = file
        .section_by_name("omp_offloading_entries")
        .expect("entry section");
    let layout = EntryLayout::new(8).expect("layout");
    let entries = decode_entry_table(
        section.data().expect("entries"),
        layout,
        object::Endianness::Little,
    )
    .expect("decode entries");
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|entry| entry.kind == 1 && entry.version == 1));

    for name in [
        "__start_omp_offloading_entries",
        "__stop_omp_offloading_entries",
        ".offloading.entry.vec_add",
        ".offloading.entry.reduce",
    ] {
        assert!(file.symbol_by_name(name).is_some(), "missing symbol {name}");
    }
    let kernel = file.symbol_by_name("vec_add").expect("kernel reference");
    assert!(kernel.is_undefined());
}

#[test]
fn emit_entries_uses_configured_section() {
    let dir = tempdir().expect("tempdir");
    fs::write(
        dir.path().join("offload.cfg"),
        "# entry table\nentries.section = cfg_entries\n",
    )
    .expect("write config");
    let output = dir.path().join("entries.o");

    offloading_cmd()
        .current_dir(dir.path())
        .args(["emit-entries", "--target", "aarch64-unknown-linux-gnu", "--kind", "cuda", "-o"])
        .arg(&output)
        .arg("k")
        .assert()
        .success();

    let bytes = fs::read(&output).expect("read object");
    let file = object::File::parse(&*bytes).expect("parse object");
    assert!(file.section_by_name("cfg_entries").is_some());
    assert!(file.symbol_by_name("__start_cfg_entries").is_some());
}

#[test]
fn emit_entries_rejects_device_targets() {
    let dir = tempdir().expect("tempdir");
    offloading_cmd()
        .current_dir(dir.path())
        .args(["emit-entries", "--target", "amdgcn-amd-amdhsa", "-o", "out.o", "k"])
        .assert()
        .failure()
        .stderr(contains("target error"));
}

#[test]
fn emit_entries_writes_coff_segment_group() {
    let dir = tempdir().expect("tempdir");
    let output = dir.path().join("entries.obj");

    offloading_cmd()
        .current_dir(dir.path())
        .args(["emit-entries", "--target", "x86_64-pc-windows-msvc", "-o"])
        .arg(&output)
        .args(["vec_add", "reduce"])
        .assert()
        .success();

    let bytes = fs::read(&output).expect("read object");
    let file = object::File::parse(&*bytes).expect("parse object");
    assert_eq!(file.format(), object::BinaryFormat::Coff);
    let entries: u64 = file
        .sections()
        .filter(|section| section.name() == Ok("llvm_offload_entries$OE"))
        .map(|section| section.size())
        .sum();
    assert_eq!(entries, 2 * EntryLayout::new(8).expect("layout").size());
    for name in ["llvm_offload_entries$OA", "llvm_offload_entries$OZ"] {
        assert!(file.section_by_name(name).is_some(), "missing section {name}");
    }
    assert!(file.symbol_by_name("$offloading$entry$vec_add").is_some());
}
