use criterion::{Criterion, black_box, criterion_group, criterion_main};
use ndarray::{Array, IxDyn};
use std::collections::BTreeMap;
use std::sync::Arc;
use tempfile::TempDir;
use voxcache_core::nifti::{IDENTITY, write_image};
use voxcache_core::{
    Argument, ArgumentHasher, ContentHasher, FunctionSignature, HashAlgorithm, HashingConfig,
    ImageAwareHasher, ImageHandle, ImageLoader, MemoizedFunction, NiftiLoader,
    compute_argument_hash,
};

fn volume() -> ImageHandle {
    let data: Vec<f32> = (0..64 * 64 * 32).map(|v| (v % 251) as f32).collect();
    let arr = Array::from_shape_vec(IxDyn(&[64, 64, 32]), data).unwrap();
    ImageHandle::new(arr.into(), IDENTITY).unwrap()
}

fn bench_image_hashing(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bench.nii");
    write_image(&path, &volume()).unwrap();
    let file_backed = Argument::Image(Arc::new(NiftiLoader.load(&path).unwrap()));
    let in_memory = Argument::from(volume());

    for algorithm in [HashAlgorithm::Blake3, HashAlgorithm::Sha256] {
        let config = HashingConfig {
            algorithm,
            coerce_mmap: true,
        };
        let aware = ImageAwareHasher::new(config);
        let content = ContentHasher::new(config);

        c.bench_function(&format!("hash_file_image_surrogate_{algorithm}"), |b| {
            b.iter(|| aware.hash_value(black_box(&file_backed)).unwrap())
        });
        c.bench_function(&format!("hash_file_image_content_{algorithm}"), |b| {
            b.iter(|| content.hash_value(black_box(&file_backed)).unwrap())
        });
        c.bench_function(&format!("hash_in_memory_image_{algorithm}"), |b| {
            b.iter(|| aware.hash_value(black_box(&in_memory)).unwrap())
        });
    }
}

fn bench_argument_filtering(c: &mut Criterion) {
    let func = MemoizedFunction::new(
        FunctionSignature::new("decomposition.fit")
            .param("imgs")
            .param_with_default("n_components", 20i64)
            .param_with_default("alpha", 0.1)
            .param_with_default("verbose", 0i64)
            .varkw(),
    )
    .ignore(["verbose"]);
    let hasher = ImageAwareHasher::new(HashingConfig::default());
    let args = vec![Argument::List(
        (0..32).map(|i| Argument::Str(format!("sub-{i:02}.nii"))).collect(),
    )];
    let mut kwargs = BTreeMap::new();
    kwargs.insert("alpha".to_string(), Argument::Float(0.05));
    kwargs.insert("random_state".to_string(), Argument::Int(0));

    c.bench_function("compute_argument_hash_paths", |b| {
        b.iter(|| compute_argument_hash(&hasher, &func, black_box(&args), black_box(&kwargs)).unwrap())
    });
}

criterion_group!(benches, bench_image_hashing, bench_argument_filtering);
criterion_main!(benches);
