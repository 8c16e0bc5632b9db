//! Build script for lutr
//!
//! Compiles CUDA kernels to PTX when the cuda feature is enabled.

fn main() {
    #[cfg(feature = "cuda")]
    compile_cuda_kernels();
}

#[cfg(feature = "cuda")]
fn compile_cuda_kernels() {
    use std::env;
    use std::path::PathBuf;
    use std::process::Command;

    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR is set by cargo"));

    // (directory, filename, arch). sm_80 is the oldest tuned target; the PTX
    // is JIT-compiled forward to sm_86/sm_89/sm_90.
    let kernel_sets: Vec<(PathBuf, &str, &str)> = vec![(
        PathBuf::from("src/quant/cuda/kernels"),
        "lut_gemm.cu",
        "sm_80",
    )];

    let nvcc = find_nvcc().unwrap_or_else(|| {
        eprintln!();
        eprintln!("=== CUDA COMPILATION ERROR ===");
        eprintln!("Could not find nvcc (NVIDIA CUDA Compiler).");
        eprintln!("Install CUDA Toolkit: https://developer.nvidia.com/cuda-downloads");
        eprintln!();
        panic!("nvcc not found - CUDA Toolkit must be installed for the 'cuda' feature");
    });

    for (kernels_dir, kernel_file, arch) in &kernel_sets {
        let cu_path = kernels_dir.join(kernel_file);
        let ptx_path = out_dir.join(kernel_file.replace(".cu", ".ptx"));

        println!("cargo:rerun-if-changed={}", cu_path.display());

        if !cu_path.exists() {
            panic!("CUDA kernel source not found: {}", cu_path.display());
        }

        let include_arg = format!("-I{}", kernels_dir.display());
        let arch_arg = format!("-arch={arch}");

        let output = Command::new(&nvcc)
            .arg("-ptx")
            .arg("-O3")
            .arg(&arch_arg)
            .arg(&include_arg)
            .arg("-o")
            .arg(&ptx_path)
            .arg(&cu_path)
            .output();

        match output {
            Ok(output) if output.status.success() => {}
            Ok(output) => {
                eprintln!();
                eprintln!("=== CUDA COMPILATION FAILED ===");
                eprintln!("Failed to compile: {kernel_file}");
                let stdout = String::from_utf8_lossy(&output.stdout);
                let stderr = String::from_utf8_lossy(&output.stderr);
                if !stdout.is_empty() {
                    eprintln!("stdout: {stdout}");
                }
                if !stderr.is_empty() {
                    eprintln!("stderr: {stderr}");
                }
                panic!("nvcc compilation failed for {kernel_file}");
            }
            Err(e) => {
                panic!("nvcc execution failed for {kernel_file}: {e}");
            }
        }
    }

    println!("cargo:rustc-env=CUDA_KERNEL_DIR={}", out_dir.display());
}

#[cfg(feature = "cuda")]
fn find_nvcc() -> Option<String> {
    use std::env;
    use std::path::PathBuf;
    use std::process::Command;

    if let Ok(cuda_path) = env::var("CUDA_PATH") {
        let nvcc = PathBuf::from(&cuda_path).join("bin").join("nvcc");
        if nvcc.exists() {
            return Some(nvcc.to_string_lossy().to_string());
        }
    }

    let common_paths = [
        "/usr/local/cuda/bin/nvcc",
        "/usr/local/cuda-12/bin/nvcc",
        "/opt/cuda/bin/nvcc",
    ];
    for path in common_paths {
        if std::path::Path::new(path).exists() {
            return Some(path.to_string());
        }
    }

    if Command::new("nvcc").arg("--version").output().is_ok() {
        return Some("nvcc".to_string());
    }

    None
}
