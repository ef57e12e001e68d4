//! Cache-key behavior for file-backed and in-memory images.

use ndarray::{Array, IxDyn};
use pretty_assertions::assert_eq;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use voxcache_core::hashing::hash_value;
use voxcache_core::nifti::{DataObj, IDENTITY, ImageState, write_image};
use voxcache_core::{
    Argument, ArgumentHasher, CacheContext, ContentHasher, DataType, DtypeRequest,
    FunctionSignature, HashAlgorithm, HashingConfig, ImageAwareHasher, ImageHandle, ImageLoader,
    MemoizedFunction, NiftiError, NiftiLoader, VoxcacheConfig, compute_argument_hash, load_image,
};

fn affine() -> [[f64; 4]; 4] {
    [
        [-2.0, 0.0, 0.0, 90.0],
        [0.0, 2.0, 0.0, -126.0],
        [0.0, 0.0, 2.0, -72.0],
        [0.0, 0.0, 0.0, 1.0],
    ]
}

fn volume(offset: f32) -> ImageHandle {
    let data: Vec<f32> = (0..64).map(|v| v as f32 * 0.5 + offset).collect();
    let arr = Array::from_shape_vec(IxDyn(&[4, 4, 4]), data).unwrap();
    ImageHandle::new(arr.into(), affine()).unwrap()
}

fn write_volume(dir: &TempDir, name: &str) -> PathBuf {
    let path = dir.path().join(name);
    write_image(&path, &volume(0.0)).unwrap();
    path
}

fn hasher() -> ImageAwareHasher {
    ImageAwareHasher::new(HashingConfig::default())
}

fn load(path: &Path) -> Argument {
    Argument::Image(Arc::new(NiftiLoader.load(path).unwrap()))
}

fn shift_mtime(path: &Path, by: Duration) {
    let modified = std::fs::metadata(path).unwrap().modified().unwrap();
    let file = File::options().write(true).open(path).unwrap();
    file.set_modified(modified + by).unwrap();
}

#[test]
fn same_file_same_mtime_gives_identical_digest() {
    let dir = TempDir::new().unwrap();
    let path = write_volume(&dir, "sub-01_bold.nii");

    let first = hasher().hash_value(&load(&path)).unwrap();
    let second = hasher().hash_value(&load(&path)).unwrap();
    assert_eq!(first, second);
}

#[test]
fn digest_does_not_depend_on_reading_voxels() {
    let dir = TempDir::new().unwrap();
    let path = write_volume(&dir, "anat.nii");

    let untouched = load(&path);
    let read = load(&path);
    let voxels = read.as_image().unwrap().data().unwrap();
    assert_eq!(voxels.len(), 64);

    assert_eq!(
        hasher().hash_value(&untouched).unwrap(),
        hasher().hash_value(&read).unwrap()
    );
}

#[test]
fn mtime_change_alone_changes_digest() {
    let dir = TempDir::new().unwrap();
    let path = write_volume(&dir, "anat.nii");
    let before = hasher().hash_value(&load(&path)).unwrap();

    shift_mtime(&path, Duration::from_secs(5));
    let after = hasher().hash_value(&load(&path)).unwrap();
    assert_ne!(before, after);
}

#[test]
fn identical_content_at_another_path_is_a_different_key() {
    let dir = TempDir::new().unwrap();
    let a = write_volume(&dir, "a.nii");
    let b = dir.path().join("b.nii");
    std::fs::copy(&a, &b).unwrap();
    let mtime = std::fs::metadata(&a).unwrap().modified().unwrap();
    File::options()
        .write(true)
        .open(&b)
        .unwrap()
        .set_modified(mtime)
        .unwrap();

    assert_ne!(
        hasher().hash_value(&load(&a)).unwrap(),
        hasher().hash_value(&load(&b)).unwrap()
    );
}

#[test]
fn in_memory_images_are_hashed_by_voxels() {
    let h = hasher();
    let a = h.hash_value(&volume(0.0).into()).unwrap();
    let b = h.hash_value(&volume(0.0).into()).unwrap();
    let c = h.hash_value(&volume(1e-3).into()).unwrap();
    assert_eq!(a, b);
    assert_ne!(a, c);
}

#[test]
fn coerce_mmap_toggles_proxy_and_array_equivalence() {
    let dir = TempDir::new().unwrap();
    let path = write_volume(&dir, "func.nii");
    let mut proxied = NiftiLoader.load(&path).unwrap();
    assert!(proxied.dataobj().is_proxy());
    proxied.set_filename(None);

    let in_memory = ImageHandle::with_header(
        DataObj::Array(proxied.data().unwrap().into_owned()),
        *proxied.affine(),
        proxied.header().clone(),
    )
    .unwrap();
    let proxied = Argument::from(proxied);
    let in_memory = Argument::from(in_memory);

    let coerced = |v: &Argument| hash_value(v, HashAlgorithm::Blake3, true).unwrap();
    let strict = |v: &Argument| hash_value(v, HashAlgorithm::Blake3, false).unwrap();
    assert_eq!(coerced(&proxied), coerced(&in_memory));
    assert_ne!(strict(&proxied), strict(&in_memory));
    assert_eq!(strict(&in_memory), coerced(&in_memory));
}

#[test]
fn content_hasher_ignores_the_file_shortcut() {
    let dir = TempDir::new().unwrap();
    let path = write_volume(&dir, "anat.nii");
    let content = ContentHasher::new(HashingConfig::default());

    let before = content.hash_value(&load(&path)).unwrap();
    shift_mtime(&path, Duration::from_secs(5));
    let after = content.hash_value(&load(&path)).unwrap();
    assert_eq!(before, after);
}

#[test]
fn state_roundtrip_keeps_filename_and_key() {
    let dir = TempDir::new().unwrap();
    let path = write_volume(&dir, "anat.nii");
    let original = NiftiLoader.load(&path).unwrap();

    let json = serde_json::to_string(&original.to_state()).unwrap();
    assert!(!json.contains("\"data\""));
    let restored = ImageHandle::from_state(serde_json::from_str::<ImageState>(&json).unwrap()).unwrap();

    assert!(restored.dataobj().is_proxy());
    assert_eq!(restored.filename(), Some(path.as_path()));
    assert_eq!(
        hasher().hash_value(&original.into()).unwrap(),
        hasher().hash_value(&restored.into()).unwrap()
    );
}

#[test]
fn load_image_rejects_non_images() {
    let err = load_image(&NiftiLoader, &Argument::Int(5), DtypeRequest::Keep).unwrap_err();
    assert!(matches!(err, NiftiError::NotSpatialImage { ref repr } if repr == "5"));
    assert!(err.to_string().contains("not compatible with the NIfTI format"));
}

#[test]
fn load_image_auto_casts_and_drops_filename() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("labels.nii.gz");
    let labels = Array::from_shape_vec(IxDyn(&[2, 2, 2]), vec![0u8, 1, 2, 3, 0, 1, 2, 3]).unwrap();
    write_image(&path, &ImageHandle::new(labels.into(), affine()).unwrap()).unwrap();

    let img = load_image(&NiftiLoader, &Argument::Path(path.clone()), DtypeRequest::Auto).unwrap();
    assert_eq!(img.data_dtype(), Some(DataType::I32));
    assert_eq!(img.affine(), &affine());
    assert!(img.filename().is_none());

    let kept = load_image(&NiftiLoader, &Argument::Path(path.clone()), DtypeRequest::Keep).unwrap();
    assert_eq!(kept.data_dtype(), Some(DataType::U8));
    assert_eq!(kept.filename(), Some(path.as_path()));
}

#[test]
fn memoized_pipeline_step_reuses_output_until_file_changes() {
    let dir = TempDir::new().unwrap();
    let path = write_volume(&dir, "bold.nii");
    let mut config = VoxcacheConfig::default();
    config.memory.location = dir.path().join("cache");
    let ctx = CacheContext::new(config);
    let memory = ctx.memory();

    let func = MemoizedFunction::new(
        FunctionSignature::new("masking.compute_mean")
            .param("img")
            .param_with_default("verbose", 0i64),
    )
    .ignore(["verbose"]);

    let mean = |arg: &Argument| -> f64 {
        let img = ctx.load_image(arg, Some(DtypeRequest::Exact(DataType::F64))).unwrap();
        img.data().unwrap().stats().unwrap().mean
    };

    let run = |verbose: i64| {
        let arg = load(&path);
        let mut kwargs = BTreeMap::new();
        kwargs.insert("verbose".to_string(), Argument::Int(verbose));
        memory
            .call(&func, std::slice::from_ref(&arg), &kwargs, || mean(&arg))
            .unwrap()
    };

    let first = run(0);
    let second = run(5);
    assert_eq!(first, second);
    assert_eq!(memory.stats().hits, 1);

    shift_mtime(&path, Duration::from_secs(60));
    run(0);
    assert_eq!(memory.stats().misses, 2);
}

#[test]
fn argument_hash_matches_between_context_and_free_function() {
    let dir = TempDir::new().unwrap();
    let path = write_volume(&dir, "t1.nii");
    let ctx = CacheContext::new(VoxcacheConfig::default());
    let func = MemoizedFunction::new(FunctionSignature::new("smooth").param("img").param("fwhm"));
    let args = vec![load(&path), Argument::Float(6.0)];

    let via_ctx = ctx.argument_hash(&func, &args, &BTreeMap::new()).unwrap();
    let direct = compute_argument_hash(ctx.hasher().as_ref(), &func, &args, &BTreeMap::new()).unwrap();
    assert_eq!(via_ctx, direct);
    assert_eq!(ctx.hasher().algorithm(), HashAlgorithm::Blake3);
}
