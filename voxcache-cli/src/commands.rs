//! Subcommand handlers.

use crate::{Commands, ConfigAction};
use anyhow::Context;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use voxcache_core::config::{load_config, workspace_config_path};
use voxcache_core::{
    Argument, ArgumentHasher, CacheContext, ContentHasher, ConvergenceTrace, DtypeRequest,
    FunctionSignature, HashAlgorithm, ImageAwareHasher, MemoizedFunction, NiftiLoader,
    VoxcacheConfig,
};

pub fn handle_command(
    command: Commands,
    workspace: &Path,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    match command {
        Commands::Hash {
            paths,
            algorithm,
            no_coerce_mmap,
            content,
            function,
        } => {
            let options = HashOptions {
                algorithm,
                coerce_mmap: !no_coerce_mmap,
                content,
                function,
            };
            handle_hash(&paths, options, workspace, out)
        }
        Commands::Inspect { path, dtype } => handle_inspect(&path, dtype, workspace, out),
        Commands::Trace { file } => handle_trace(&file, out),
        Commands::Config { action } => handle_config(action, workspace, out),
    }
}

fn workspace_config(workspace: &Path) -> anyhow::Result<VoxcacheConfig> {
    load_config(Some(workspace), None).map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
}

struct HashOptions {
    algorithm: Option<HashAlgorithm>,
    coerce_mmap: bool,
    content: bool,
    function: String,
}

fn handle_hash(
    paths: &[PathBuf],
    options: HashOptions,
    workspace: &Path,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let mut config = workspace_config(workspace)?;
    if let Some(algorithm) = options.algorithm {
        config.hashing.algorithm = algorithm;
    }
    if !options.coerce_mmap {
        config.hashing.coerce_mmap = false;
    }

    let hasher: Arc<dyn ArgumentHasher> = if options.content {
        Arc::new(ContentHasher::new(config.hashing))
    } else {
        Arc::new(ImageAwareHasher::new(config.hashing))
    };
    let ctx = CacheContext::with_strategies(config, Arc::new(NiftiLoader), hasher);

    let mut args = Vec::with_capacity(paths.len());
    for path in paths {
        let image = ctx
            .load_image(&Argument::Path(path.clone()), Some(DtypeRequest::Keep))
            .with_context(|| format!("Failed to load {}", path.display()))?;
        args.push(Argument::Image(image));
    }

    for (path, arg) in paths.iter().zip(&args) {
        writeln!(out, "{}  {}", ctx.hasher().hash_value(arg)?, path.display())?;
    }

    let func = MemoizedFunction::new(FunctionSignature::new(options.function).varargs());
    let key = ctx.cache_key(&func, &args, &BTreeMap::new())?;
    info!(key = %key, images = args.len(), "Computed call key");
    writeln!(out, "{} ({})", key, key.args_digest.algorithm)?;
    Ok(())
}

fn handle_inspect(
    path: &Path,
    dtype: Option<DtypeRequest>,
    workspace: &Path,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let config = workspace_config(workspace)?;
    let ctx = CacheContext::new(config);
    let image = ctx
        .load_image(&Argument::Path(path.to_path_buf()), dtype)
        .with_context(|| format!("Failed to load {}", path.display()))?;

    let on_disk = image
        .data_dtype()
        .map(|d| d.to_string())
        .unwrap_or_else(|| format!("code {}", image.header().datatype));
    let storage = if image.dataobj().is_proxy() {
        "file region"
    } else {
        "in memory"
    };
    let cast = image.filename().is_none();

    writeln!(out, "path:    {}", path.display())?;
    writeln!(out, "shape:   {:?}", image.shape())?;
    writeln!(out, "dtype:   {} (header: {})", image.dataobj().dtype(), on_disk)?;
    writeln!(out, "storage: {}", storage)?;
    writeln!(out, "cast:    {}", if cast { "yes" } else { "no" })?;
    writeln!(out, "affine:")?;
    for row in image.affine() {
        writeln!(
            out,
            "  [{:>10.4} {:>10.4} {:>10.4} {:>10.4}]",
            row[0], row[1], row[2], row[3]
        )?;
    }
    if let Some(stats) = image.data()?.stats() {
        writeln!(
            out,
            "values:  min {:.4}  max {:.4}  mean {:.4}",
            stats.min, stats.max, stats.mean
        )?;
    }
    Ok(())
}

fn handle_trace(file: &Path, out: &mut impl Write) -> anyhow::Result<()> {
    let trace = ConvergenceTrace::load(file)
        .with_context(|| format!("Failed to read trace {}", file.display()))?;

    writeln!(out, "run {} recorded {}", trace.run_id, trace.recorded_at.to_rfc3339())?;
    writeln!(out, "{:>9}  {:>12}  {:>14}", "iteration", "elapsed (s)", "score")?;
    for obs in &trace.observations {
        writeln!(
            out,
            "{:>9}  {:>12.3}  {:>14.6}",
            obs.iteration, obs.elapsed_secs, obs.score
        )?;
    }
    writeln!(out, "scoring overhead: {:.3}s", trace.eval_secs)?;
    if let Some(best) = trace.best() {
        writeln!(
            out,
            "best: iteration {} score {:.6}",
            best.iteration, best.score
        )?;
    }
    Ok(())
}

fn handle_config(action: ConfigAction, workspace: &Path, out: &mut impl Write) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_path = workspace_config_path(workspace);
            if config_path.exists() {
                writeln!(
                    out,
                    "Configuration file already exists at: {}",
                    config_path.display()
                )?;
                return Ok(());
            }
            if let Some(dir) = config_path.parent() {
                std::fs::create_dir_all(dir)?;
            }
            std::fs::write(&config_path, VoxcacheConfig::default().to_toml()?)?;
            writeln!(
                out,
                "Created default configuration at: {}",
                config_path.display()
            )?;
            Ok(())
        }
        ConfigAction::Show => {
            let config = workspace_config(workspace)?;
            writeln!(out, "{}", config.to_toml()?)?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tempfile::TempDir;
    use voxcache_core::ImageHandle;
    use voxcache_core::nifti::{DataType, IDENTITY, VoxelArray, write_image};
    use voxcache_core::training::{ConvergenceMonitor, ManualClock, Scorer};

    /// 2x2x2 int16 volume holding 0, 10, ..., 70.
    fn volume() -> ImageHandle {
        let bytes: Vec<u8> = (0i16..8).flat_map(|v| (v * 10).to_le_bytes()).collect();
        let data = VoxelArray::from_bytes(DataType::I16, &[2, 2, 2], &bytes, false).unwrap();
        ImageHandle::new(data, IDENTITY).unwrap()
    }

    fn run(command: Commands, workspace: &Path) -> String {
        let mut out = Vec::new();
        handle_command(command, workspace, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    fn hash_command(paths: Vec<PathBuf>, content: bool) -> Commands {
        Commands::Hash {
            paths,
            algorithm: None,
            no_coerce_mmap: false,
            content,
            function: "voxcache.hash".into(),
        }
    }

    #[test]
    fn test_hash_prints_per_image_and_call_digests() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.nii");
        let b = dir.path().join("b.nii.gz");
        write_image(&a, &volume()).unwrap();
        write_image(&b, &volume()).unwrap();

        let output = run(hash_command(vec![a.clone(), b.clone()], false), dir.path());
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with("a.nii"));
        assert!(lines[1].ends_with("b.nii.gz"));
        assert!(lines[2].starts_with("voxcache.hash/"));
        assert!(lines[2].ends_with("(blake3)"));

        let again = run(hash_command(vec![a, b], false), dir.path());
        assert_eq!(output, again);
    }

    #[test]
    fn test_hash_content_mode_ignores_mtime() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("img.nii");
        write_image(&path, &volume()).unwrap();
        let before = run(hash_command(vec![path.clone()], true), dir.path());

        let modified = std::fs::metadata(&path).unwrap().modified().unwrap();
        std::fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(modified + Duration::from_secs(30))
            .unwrap();
        let after = run(hash_command(vec![path.clone()], true), dir.path());
        assert_eq!(before, after);
        assert_ne!(before, run(hash_command(vec![path], false), dir.path()));
    }

    #[test]
    fn test_hash_missing_file_fails() {
        let dir = TempDir::new().unwrap();
        let mut out = Vec::new();
        let err = handle_command(
            hash_command(vec![dir.path().join("missing.nii")], false),
            dir.path(),
            &mut out,
        )
        .unwrap_err();
        assert!(err.to_string().contains("missing.nii"));
    }

    #[test]
    fn test_inspect_reports_cast() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("img.nii");
        write_image(&path, &volume()).unwrap();

        let kept = run(
            Commands::Inspect {
                path: path.clone(),
                dtype: Some(DtypeRequest::Keep),
            },
            dir.path(),
        );
        assert!(kept.contains("shape:   [2, 2, 2]"));
        assert!(kept.contains("dtype:   i16 (header: i16)"));
        assert!(kept.contains("storage: file region"));
        assert!(kept.contains("cast:    no"));

        let auto = run(
            Commands::Inspect {
                path,
                dtype: Some(DtypeRequest::Auto),
            },
            dir.path(),
        );
        assert!(auto.contains("dtype:   i32 (header: i32)"));
        assert!(auto.contains("cast:    yes"));
        assert!(auto.contains("max 70.0000"));
    }

    struct Constant(f64);

    impl Scorer<()> for Constant {
        type Error = std::convert::Infallible;

        fn score(&self, _data: &()) -> Result<f64, Self::Error> {
            Ok(self.0)
        }

        fn n_iter(&self) -> usize {
            7
        }
    }

    #[test]
    fn test_trace_table() {
        let dir = TempDir::new().unwrap();
        let clock = ManualClock::default();
        let mut monitor = ConvergenceMonitor::with_clock((), clock.clone());
        clock.advance(Duration::from_millis(1500));
        monitor.observe(&Constant(0.25)).unwrap();
        let file = dir.path().join("trace.json");
        monitor.save(&file).unwrap();

        let output = run(Commands::Trace { file }, dir.path());
        assert!(output.contains("iteration"));
        assert!(output.contains("        7         1.500        0.250000"));
        assert!(output.contains("best: iteration 7 score 0.250000"));
    }

    #[test]
    fn test_config_init_then_show() {
        let dir = TempDir::new().unwrap();
        let created = run(
            Commands::Config {
                action: ConfigAction::Init,
            },
            dir.path(),
        );
        assert!(created.starts_with("Created default configuration"));
        assert!(workspace_config_path(dir.path()).exists());

        let again = run(
            Commands::Config {
                action: ConfigAction::Init,
            },
            dir.path(),
        );
        assert!(again.starts_with("Configuration file already exists"));

        let shown = run(
            Commands::Config {
                action: ConfigAction::Show,
            },
            dir.path(),
        );
        assert!(shown.contains("[hashing]"));
        assert!(shown.contains("coerce_mmap = true"));
    }
}
