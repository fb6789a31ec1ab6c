// ============================================================================
// GarmentFE CLI: headless flattening of project files
// ============================================================================
//
// Usage examples:
//   garmentfe -i shirt.gfe -o shirt.png
//   garmentfe -i shirt.gfe --base new_fabric.png -o preview.png
//   garmentfe -i "designs/*.gfe" --output-dir flat/ -v
//
// Every input is loaded, composited over its stored (or overridden) base
// texture and written as a PNG. No 3D scene is attached.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;

use crate::bridge::NullSink;
use crate::compositor::BaseTexture;
use crate::io::{export_png, load_image, load_project};
use crate::settings::EngineSettings;

/// GarmentFE headless project flattener.
#[derive(Parser, Debug)]
#[command(
    name = "garmentfe",
    about = "Flatten GarmentFE projects to PNG textures",
    long_about = "Load .gfe garment projects, composite every visible layer over the\n\
                  base texture and write the result as PNG.\n\n\
                  Example:\n  \
                  garmentfe -i shirt.gfe -o shirt.png\n  \
                  garmentfe -i \"designs/*.gfe\" --output-dir flat/"
)]
pub struct CliArgs {
    /// Input project file(s). Glob patterns accepted (e.g. "designs/*.gfe").
    #[arg(short, long, required = true, num_args = 1..)]
    pub input: Vec<String>,

    /// Output PNG path. Only valid for single-file input.
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output directory for batch processing; files keep their stem.
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Replace the stored base texture with this image before flattening.
    #[arg(long, value_name = "IMAGE")]
    pub base: Option<PathBuf>,

    /// Engine settings file (`key = value`). Defaults to the per-user file.
    #[arg(long, value_name = "FILE.cfg")]
    pub settings: Option<PathBuf>,

    /// Print per-file timing and mirror the session log to stderr.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Run all CLI processing and return an OS exit code.
/// `0` = all files succeeded, `1` = one or more files failed.
pub fn run(args: CliArgs) -> ExitCode {
    let inputs = resolve_inputs(&args.input);
    if inputs.is_empty() {
        eprintln!("error: no input files matched the given pattern(s).");
        return ExitCode::FAILURE;
    }

    if inputs.len() > 1 && args.output.is_some() && args.output_dir.is_none() {
        eprintln!(
            "error: {} input files given but --output only accepts a single file path.\n\
             Use --output-dir to specify a destination directory for batch processing.",
            inputs.len()
        );
        return ExitCode::FAILURE;
    }

    let settings = match &args.settings {
        Some(path) => EngineSettings::load_from(path),
        None => EngineSettings::load(),
    };

    let base_override = match &args.base {
        Some(path) => match load_image(path) {
            Ok(img) => Some(img),
            Err(e) => {
                eprintln!("error: could not read base texture '{}': {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        },
        None => None,
    };

    if let Some(dir) = &args.output_dir {
        if let Err(e) = std::fs::create_dir_all(dir) {
            eprintln!("error: could not create output directory '{}': {}", dir.display(), e);
            return ExitCode::FAILURE;
        }
    }

    let total = inputs.len();
    let multi = total > 1;
    let mut any_failure = false;

    for (idx, input_path) in inputs.iter().enumerate() {
        if multi || args.verbose {
            println!("[{}/{}] {}", idx + 1, total, input_path.display());
        }
        let file_start = Instant::now();

        let Some(output_path) = build_output_path(input_path, args.output.as_deref(), args.output_dir.as_deref())
        else {
            eprintln!("  error: cannot determine output path for '{}'.", input_path.display());
            any_failure = true;
            continue;
        };

        match flatten_one(input_path, &output_path, &settings, base_override.as_ref()) {
            Ok(()) => {
                if args.verbose || multi {
                    println!(
                        "  → {} ({:.0}ms)",
                        output_path.display(),
                        file_start.elapsed().as_secs_f64() * 1000.0
                    );
                }
            }
            Err(e) => {
                tracing::warn!("flattening {} failed: {e}", input_path.display());
                eprintln!("  error: {}", e);
                any_failure = true;
            }
        }
    }

    if any_failure { ExitCode::FAILURE } else { ExitCode::SUCCESS }
}

fn flatten_one(
    input: &Path,
    output: &Path,
    settings: &EngineSettings,
    base_override: Option<&image::RgbaImage>,
) -> Result<(), String> {
    let mut project = load_project(input, settings.clone(), NullSink).map_err(|e| format!("load failed: {e}"))?;

    if let Some(img) = base_override {
        let base = BaseTexture::from_acquired(img.clone(), project.canvas_size(), settings.placeholder_white_tolerance);
        if base.is_set() {
            project
                .set_base_texture(base, Instant::now())
                .map_err(|e| format!("base texture rejected: {e}"))?;
        } else {
            eprintln!("  warning: base texture looks like a placeholder, keeping the stored one");
        }
    }

    export_png(&project, output).map_err(|e| format!("save failed: {e}"))
}

/// Expand glob patterns and literal paths into a deduplicated, ordered list.
fn resolve_inputs(patterns: &[String]) -> Vec<PathBuf> {
    let mut result: Vec<PathBuf> = Vec::new();

    for pattern in patterns {
        let as_path = Path::new(pattern);

        if as_path.exists() {
            if !result.iter().any(|p| p.as_path() == as_path) {
                result.push(as_path.to_path_buf());
            }
            continue;
        }

        match glob::glob(pattern) {
            Ok(entries) => {
                let mut matched = false;
                for entry in entries.flatten() {
                    if !result.contains(&entry) {
                        result.push(entry);
                    }
                    matched = true;
                }
                if !matched {
                    eprintln!("warning: pattern '{}' matched no files.", pattern);
                }
            }
            Err(e) => {
                eprintln!("warning: invalid glob '{}': {}", pattern, e);
            }
        }
    }

    result
}

/// Compute the output path for a single input file.
///
/// Priority:
/// 1. `--output` (explicit path, used for single-file input)
/// 2. `--output-dir` (derives filename from input stem)
/// 3. Fallback: next to the input, same stem, `.png`
fn build_output_path(input: &Path, output: Option<&Path>, output_dir: Option<&Path>) -> Option<PathBuf> {
    if let Some(out) = output {
        return Some(out.to_path_buf());
    }
    let stem = input.file_stem()?.to_string_lossy().into_owned();
    if let Some(dir) = output_dir {
        return Some(dir.join(format!("{stem}.png")));
    }
    Some(input.with_file_name(format!("{stem}.png")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_path_priority() {
        let input = Path::new("designs/shirt.gfe");
        assert_eq!(
            build_output_path(input, Some(Path::new("x.png")), Some(Path::new("out"))),
            Some(PathBuf::from("x.png"))
        );
        assert_eq!(build_output_path(input, None, Some(Path::new("out"))), Some(PathBuf::from("out/shirt.png")));
        assert_eq!(build_output_path(input, None, None), Some(PathBuf::from("designs/shirt.png")));
    }

    #[test]
    fn globs_expand_and_deduplicate() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.gfe", "b.gfe", "c.txt"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        let pattern = dir.path().join("*.gfe").to_string_lossy().into_owned();
        let literal = dir.path().join("a.gfe").to_string_lossy().into_owned();
        let found = resolve_inputs(&[literal, pattern]);
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|p| p.extension().is_some_and(|e| e == "gfe")));
    }

    #[test]
    fn args_parse() {
        let args = CliArgs::try_parse_from(["garmentfe", "-i", "a.gfe", "b.gfe", "--output-dir", "out", "-v"]).unwrap();
        assert_eq!(args.input, vec!["a.gfe", "b.gfe"]);
        assert!(args.verbose);
        assert!(args.base.is_none());
    }
}
