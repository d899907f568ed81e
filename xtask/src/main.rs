//!
//! Build System
//!

use std::{env, fs, path::Path, process::Command};

const OS_PROJECT_NAME: &str = "embercore";

fn main() {
    let cargo = env::var("CARGO").unwrap_or_else(|_| "cargo".to_string());
    let manifest_dir = env::var("CARGO_MANIFEST_DIR").unwrap();
    let base_dir = Path::new(manifest_dir.as_str()).parent().unwrap();
    let ret = match env::args().nth(1).as_deref() {
        Some("build") => build(cargo.as_str(), base_dir),
        Some("help") => show_error(cargo.as_str(), false),
        Some(c) => {
            eprintln!("Unknown command: {c}");
            show_error(&cargo, true)
        }
        None => show_error(&cargo, true),
    };
    std::process::exit(ret);
}

fn build(cargo: &str, base_dir: &Path) -> i32 {
    let target_arch = "x86_64-unknown-none";
    let output_dir = base_dir.join("bin");
    let build_type = "release";
    let target_dir = base_dir.join("target");
    let kernel_path = target_dir
        .join(target_arch)
        .join(build_type)
        .join(OS_PROJECT_NAME);

    /* Create the output dir */
    if let Err(err) = fs::create_dir_all(&output_dir) {
        eprintln!("Failed to create the output dir: {err:?}");
        return -1;
    }

    /* Build the kernel */
    let status = Command::new(cargo)
        .args([
            "build",
            format!("--{build_type}").as_str(),
            "--target",
            target_arch,
        ])
        .status();
    if !matches!(status.as_ref().map(|s| s.success()), Ok(true)) {
        eprintln!("Building the kernel is failed: {status:?}");
        return status.map_or(-1, |s| s.code().unwrap_or(-1));
    }

    /* Copy the kernel to the output dir */
    if let Err(err) = fs::copy(kernel_path, output_dir.join("kernel.elf")) {
        eprintln!("Failed to copy the kernel: {err:?}");
        return -1;
    }

    /* Build the boot ISO */
    build_iso(base_dir, target_dir.as_path(), output_dir.as_path())
}

fn build_iso(base_dir: &Path, _target_dir: &Path, output_dir: &Path) -> i32 {
    let iso_dir = output_dir.join("iso");
    let grub_dir = iso_dir.join("boot/grub");
    if let Err(err) = fs::create_dir_all(&grub_dir) {
        eprintln!("Failed to create the output dir: {err:?}");
        return -1;
    }

    /* Copy files */
    if let Err(err) = fs::copy(
        output_dir.join("kernel.elf"),
        iso_dir.join("boot/kernel.elf"),
    ) {
        eprintln!("Failed to copy the kernel: {err:?}");
        return -1;
    }
    if let Err(err) = fs::copy(
        base_dir.join("config/x86_64/grub.cfg"),
        grub_dir.join("grub.cfg"),
    ) {
        eprintln!("Failed to copy the kernel: {err:?}");
        return -1;
    }

    /* Run grub2-mkrescue */
    let mut status;
    for command_name in ["grub-mkrescue", "grub2-mkrescue"] {
        status = Command::new(command_name)
            .args([
                "-o",
                output_dir.join("boot.iso").to_str().unwrap(),
                iso_dir.to_str().unwrap(),
            ])
            .status();
        if matches!(status.as_ref().map(|s| s.success()), Ok(true)) {
            return 0;
        }
    }
    eprintln!("Building the grub iso is failed");
    -1
}

fn show_error(cargo: &str, is_error: bool) -> i32 {
    eprintln!(
        "
Usage: {cargo} xtask build

Builds the x86_64 kernel and a bootable GRUB ISO.
 "
    );
    if is_error { -1 } else { 0 }
}
