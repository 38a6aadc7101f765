use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use ollama_sync::{
    Config, FsPorts, LineProgressReporter, NoProgressReporter, SyncError, find_manifest_files,
    platform_link_installer, resolve_manifest, sync_models,
};

const MODEL_MEDIA_TYPE: &str = "application/vnd.ollama.image.model";

struct Store {
    _temp_dir: tempfile::TempDir,
    root: PathBuf,
    manifest_dir: PathBuf,
    blob_dir: PathBuf,
}

impl Store {
    fn new() -> Result<Self, Box<dyn std::error::Error>> {
        let temp_dir = tempfile::tempdir()?;
        let root = temp_dir.path().to_path_buf();
        let manifest_dir = root.join("manifests").join("registry.ollama.ai");
        let blob_dir = root.join("blobs");
        fs::create_dir_all(&manifest_dir)?;
        fs::create_dir_all(&blob_dir)?;

        Ok(Self {
            _temp_dir: temp_dir,
            root,
            manifest_dir,
            blob_dir,
        })
    }

    fn config<P: AsRef<Path>>(&self, destinations: &[P]) -> Config {
        Config {
            manifest_dir: self.manifest_dir.clone(),
            blob_dir: self.blob_dir.clone(),
            destinations: destinations
                .iter()
                .map(|d| d.as_ref().to_path_buf())
                .collect(),
        }
    }

    fn write_blob(&self, hex: &str, contents: &str) -> Result<PathBuf, std::io::Error> {
        let path = self.blob_dir.join(format!("sha256-{hex}"));
        fs::write(&path, contents)?;
        Ok(path)
    }

    fn write_manifest(&self, relative: &str, contents: &str) -> Result<PathBuf, std::io::Error> {
        let path = self.manifest_dir.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, contents)?;
        Ok(path)
    }

    /// Writes a complete model: manifest, model-config blob and weights blob.
    fn write_model(
        &self,
        relative: &str,
        config_hex: &str,
        model_hex: &str,
        model_type: &str,
    ) -> Result<PathBuf, std::io::Error> {
        self.write_blob(
            config_hex,
            &format!(
                r#"{{"file_type":"gguf","model_format":"gguf","model_type":"{model_type}"}}"#
            ),
        )?;
        let blob = self.write_blob(model_hex, "weights")?;
        self.write_manifest(relative, &manifest_json(config_hex, MODEL_MEDIA_TYPE, model_hex))?;
        Ok(blob)
    }
}

fn manifest_json(config_hex: &str, media_type: &str, model_hex: &str) -> String {
    format!(
        r#"{{
            "schemaVersion": 2,
            "config": {{"mediaType": "application/vnd.docker.container.image.v1+json", "digest": "sha256:{config_hex}"}},
            "layers": [
                {{"mediaType": "application/vnd.ollama.image.template", "digest": "sha256:tmpl"}},
                {{"mediaType": "{media_type}", "digest": "sha256:{model_hex}"}}
            ]
        }}"#
    )
}

#[test]
fn resolves_blob_and_link_name() -> Result<(), Box<dyn std::error::Error>> {
    let store = Store::new()?;
    let blob = store.write_model("modelX/latest", "aaa", "bbb", "7B")?;

    let resolved = resolve_manifest(
        &FsPorts::new(),
        &store.manifest_dir.join("modelX").join("latest"),
        &store.blob_dir,
    )?;

    assert_eq!(resolved.model_blob, blob);
    assert_eq!(resolved.model_name, "modelX");
    assert_eq!(resolved.file_name, "modelX-7B-gguf.gguf");

    Ok(())
}

#[cfg(unix)]
#[test]
fn links_model_into_destination() -> Result<(), Box<dyn std::error::Error>> {
    let store = Store::new()?;
    let blob = store.write_model("modelX/latest", "aaa", "bbb", "7B")?;
    let destination = store.root.join("lm-studio").join("ollama");

    let stats = sync_models(
        &FsPorts::new(),
        &platform_link_installer(),
        &NoProgressReporter::new(),
        &store.config(&[&destination]),
    )?;

    let target = destination.join("modelX").join("modelX-7B-gguf.gguf");
    assert_eq!(fs::read_link(&target)?, blob);
    assert_eq!(fs::read_to_string(&target)?, "weights");
    assert_eq!(stats.manifests_found, 1);
    assert_eq!(stats.manifests_resolved, 1);
    assert_eq!(stats.links_created, 1);
    assert_eq!(stats.destination_failures, 0);

    Ok(())
}

#[cfg(unix)]
#[test]
fn links_into_every_destination() -> Result<(), Box<dyn std::error::Error>> {
    let store = Store::new()?;
    let blob = store.write_model("modelX/latest", "aaa", "bbb", "7B")?;
    let first = store.root.join("first");
    let second = store.root.join("second").join("nested");

    let stats = sync_models(
        &FsPorts::new(),
        &platform_link_installer(),
        &NoProgressReporter::new(),
        &store.config(&[&first, &second]),
    )?;

    for destination in [&first, &second] {
        let target = destination.join("modelX").join("modelX-7B-gguf.gguf");
        assert_eq!(fs::read_link(&target)?, blob);
    }
    assert_eq!(stats.links_created, 2);

    Ok(())
}

#[cfg(unix)]
#[test]
fn rerun_replaces_existing_links() -> Result<(), Box<dyn std::error::Error>> {
    let store = Store::new()?;
    let blob = store.write_model("modelX/latest", "aaa", "bbb", "7B")?;
    let destination = store.root.join("dest");
    let config = store.config(&[&destination]);

    let model_dir = destination.join("modelX");
    fs::create_dir_all(&model_dir)?;
    let stale = store.write_blob("old", "old weights")?;
    std::os::unix::fs::symlink(&stale, model_dir.join("modelX-7B-gguf.gguf"))?;

    let mut outputs = Vec::new();
    for _ in 0..2 {
        let reporter = LineProgressReporter::with_writer(Cursor::new(Vec::new()));
        let stats = sync_models(
            &FsPorts::new(),
            &platform_link_installer(),
            &reporter,
            &config,
        )?;
        assert_eq!(stats.links_created, 1);
        assert_eq!(stats.destination_failures, 0);
        outputs.push(String::from_utf8(reporter.into_inner().into_inner())?);
    }

    // Only the first run found a link to a different blob.
    assert!(outputs[0].contains(&format!("(was {})", stale.display())));
    assert!(!outputs[1].contains("replacing:"));

    let entries: Vec<_> = fs::read_dir(&model_dir)?.collect::<Result<_, _>>()?;
    assert_eq!(entries.len(), 1);
    assert_eq!(fs::read_link(model_dir.join("modelX-7B-gguf.gguf"))?, blob);

    Ok(())
}

#[test]
fn manifest_without_model_layer_leaves_no_trace() -> Result<(), Box<dyn std::error::Error>> {
    let store = Store::new()?;
    store.write_blob("aaa", r#"{"model_type":"7B"}"#)?;
    let manifest_path = store.write_manifest(
        "modelX/latest",
        &manifest_json("aaa", "application/vnd.ollama.image.license", "bbb"),
    )?;
    let destination = store.root.join("dest");

    let resolved = resolve_manifest(&FsPorts::new(), &manifest_path, &store.blob_dir);
    assert!(matches!(resolved, Err(SyncError::NoModelLayer { .. })));

    let stats = sync_models(
        &FsPorts::new(),
        &platform_link_installer(),
        &NoProgressReporter::new(),
        &store.config(&[&destination]),
    )?;

    assert_eq!(stats.manifests_found, 1);
    assert_eq!(stats.manifests_failed, 1);
    assert!(!destination.exists());

    Ok(())
}

#[test]
fn manifest_errors_are_reported_per_site() -> Result<(), Box<dyn std::error::Error>> {
    let store = Store::new()?;
    let ports = FsPorts::new();

    let broken = store.write_manifest("broken/latest", "{not json")?;
    let result = resolve_manifest(&ports, &broken, &store.blob_dir);
    assert!(matches!(result, Err(SyncError::DecodeManifest { .. })));

    let missing_config =
        store.write_manifest("orphan/latest", &manifest_json("nope", MODEL_MEDIA_TYPE, "bbb"))?;
    let result = resolve_manifest(&ports, &missing_config, &store.blob_dir);
    assert!(matches!(result, Err(SyncError::ReadModelConfig { .. })));

    store.write_blob("badcfg", "[1, 2")?;
    let bad_config =
        store.write_manifest("badcfg/latest", &manifest_json("badcfg", MODEL_MEDIA_TYPE, "bbb"))?;
    let result = resolve_manifest(&ports, &bad_config, &store.blob_dir);
    assert!(matches!(result, Err(SyncError::DecodeModelConfig { .. })));

    let result = resolve_manifest(&ports, &store.manifest_dir.join("absent"), &store.blob_dir);
    assert!(matches!(result, Err(SyncError::ReadManifest { .. })));

    Ok(())
}

#[cfg(unix)]
#[test]
fn bad_manifest_does_not_stop_the_run() -> Result<(), Box<dyn std::error::Error>> {
    let store = Store::new()?;
    store.write_manifest("broken/latest", "{not json")?;
    store.write_model("good/latest", "aaa", "bbb", "3B")?;
    let destination = store.root.join("dest");

    let stats = sync_models(
        &FsPorts::new(),
        &platform_link_installer(),
        &NoProgressReporter::new(),
        &store.config(&[&destination]),
    )?;

    assert_eq!(stats.manifests_found, 2);
    assert_eq!(stats.manifests_failed, 1);
    assert_eq!(stats.links_created, 1);
    assert!(destination.join("good").join("good-3B-gguf.gguf").exists());

    Ok(())
}

#[cfg(unix)]
#[test]
fn failing_destination_does_not_block_others() -> Result<(), Box<dyn std::error::Error>> {
    let store = Store::new()?;
    let blob = store.write_model("modelX/latest", "aaa", "bbb", "7B")?;
    let good = store.root.join("good");
    let bad = store.root.join("bad");
    fs::write(&bad, "a file where a directory should be")?;

    let stats = sync_models(
        &FsPorts::new(),
        &platform_link_installer(),
        &NoProgressReporter::new(),
        &store.config(&[&bad, &good]),
    )?;

    assert_eq!(stats.destination_failures, 1);
    assert_eq!(stats.links_created, 1);
    assert_eq!(
        fs::read_link(good.join("modelX").join("modelX-7B-gguf.gguf"))?,
        blob
    );

    Ok(())
}

#[cfg(unix)]
#[test]
fn manifests_sharing_a_directory_collide_on_one_name() -> Result<(), Box<dyn std::error::Error>> {
    // Naming is per directory, so two tags of one model land on the same
    // target and whichever is processed last wins.
    let store = Store::new()?;
    let first = store.write_model("modelX/latest", "aaa", "bbb", "7B")?;
    let second = store.write_model("modelX/v2", "aaa", "ccc", "7B")?;
    let destination = store.root.join("dest");

    let stats = sync_models(
        &FsPorts::new(),
        &platform_link_installer(),
        &NoProgressReporter::new(),
        &store.config(&[&destination]),
    )?;

    let model_dir = destination.join("modelX");
    let entries: Vec<_> = fs::read_dir(&model_dir)?.collect::<Result<_, _>>()?;
    assert_eq!(entries.len(), 1);
    let linked = fs::read_link(model_dir.join("modelX-7B-gguf.gguf"))?;
    assert!(linked == first || linked == second);
    assert_eq!(stats.links_created, 2);

    Ok(())
}

#[test]
fn walk_finds_nested_files_and_skips_noise() -> Result<(), Box<dyn std::error::Error>> {
    let store = Store::new()?;
    store.write_manifest("library/modelA/latest", "{}")?;
    store.write_manifest("modelB/7b", "{}")?;
    store.write_manifest(".DS_Store", "")?;
    store.write_manifest("modelB/Thumbs.db", "")?;
    store.write_manifest("modelB/._.DS_Store", "")?;

    let mut files = find_manifest_files(&FsPorts::new(), &store.manifest_dir)?;
    files.sort();

    assert_eq!(
        files,
        vec![
            store.manifest_dir.join("library").join("modelA").join("latest"),
            store.manifest_dir.join("modelB").join("7b"),
        ]
    );

    Ok(())
}

#[test]
fn empty_manifest_dir_is_not_an_error() -> Result<(), Box<dyn std::error::Error>> {
    let store = Store::new()?;
    let destination = store.root.join("dest");

    let stats = sync_models(
        &FsPorts::new(),
        &platform_link_installer(),
        &NoProgressReporter::new(),
        &store.config(&[&destination]),
    )?;

    assert_eq!(stats.manifests_found, 0);
    assert!(!destination.exists());

    Ok(())
}

#[test]
fn missing_manifest_dir_fails_the_run() -> Result<(), Box<dyn std::error::Error>> {
    let store = Store::new()?;
    let mut config = store.config(&[&store.root.join("dest")]);
    config.manifest_dir = store.root.join("does-not-exist");

    let result = sync_models(
        &FsPorts::new(),
        &platform_link_installer(),
        &NoProgressReporter::new(),
        &config,
    );

    assert!(matches!(result, Err(SyncError::Walk { .. })));

    Ok(())
}
