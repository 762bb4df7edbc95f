use std::fs;
use std::io::{self, Cursor, Read, Seek};
use std::path::{Path, PathBuf};

use opentelemetry::KeyValue;
use rayon::prelude::*;
use serde_json::Value;
use serde_sarif::sarif::{Artifact, ArtifactLocation, ArtifactRoles};
use tracing::{debug, warn};
use zip::ZipArchive;

use crate::error::{Error, Result};
use crate::importer::import_class;
use crate::model::Model;
use crate::telemetry::{Telemetry, with_span};

const ARCHIVE_EXTENSIONS: [&str; 4] = ["jar", "zip", "war", "ear"];
const MULTI_RELEASE_PREFIX: &str = "META-INF/versions/";

/// Input that could not be ingested without aborting the run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanFailure {
    pub location: String,
    pub message: String,
}

/// Model built from all inputs, plus the artifacts and failures seen on the way.
pub struct ScanOutput {
    pub model: Model,
    pub artifacts: Vec<Artifact>,
    pub class_count: usize,
    pub failures: Vec<ScanFailure>,
}

/// Per-input state, merged on the calling thread.
#[derive(Default)]
struct PartialScan {
    model: Model,
    artifacts: Vec<Artifact>,
    class_count: usize,
    failures: Vec<ScanFailure>,
}

/// Ingest every input in parallel and merge the partial models in input order.
pub fn scan_inputs(inputs: &[PathBuf], telemetry: Option<&Telemetry>) -> Result<ScanOutput> {
    let partials: Vec<Result<PartialScan>> = inputs
        .par_iter()
        .map(|input| {
            let span_attributes = [KeyValue::new(
                "classgate.input",
                input.display().to_string(),
            )];
            with_span(telemetry, "input.scan", &span_attributes, || {
                let mut partial = PartialScan::default();
                scan_path(input, true, telemetry, &mut partial)?;
                Ok(partial)
            })
        })
        .collect();

    let mut output = ScanOutput {
        model: Model::new(),
        artifacts: Vec::new(),
        class_count: 0,
        failures: Vec::new(),
    };
    for partial in partials {
        let partial = partial?;
        let offset = output.artifacts.len() as i64;
        output
            .artifacts
            .extend(partial.artifacts.into_iter().map(|mut artifact| {
                if let Some(parent) = artifact.parent_index.as_mut() {
                    *parent += offset;
                }
                artifact
            }));
        output.model.merge(partial.model)?;
        output.class_count += partial.class_count;
        output.failures.extend(partial.failures);
    }
    debug!(
        inputs = inputs.len(),
        classes = output.class_count,
        failures = output.failures.len(),
        "scanned inputs"
    );
    Ok(output)
}

fn scan_path(
    path: &Path,
    is_input: bool,
    telemetry: Option<&Telemetry>,
    partial: &mut PartialScan,
) -> Result<()> {
    if path.is_dir() {
        return scan_dir(path, telemetry, partial);
    }
    let roles = if is_input {
        serde_json::to_value(ArtifactRoles::AnalysisTarget)
            .ok()
            .map(|role| vec![role])
    } else {
        None
    };
    if has_extension(path, "class") {
        scan_class_file(path, roles, partial)
    } else if is_archive_path(path) {
        scan_archive_file(path, roles, telemetry, partial);
        Ok(())
    } else if is_input {
        Err(Error::Io {
            path: path.to_path_buf(),
            source: io::Error::new(io::ErrorKind::InvalidInput, "unsupported input file"),
        })
    } else {
        Ok(())
    }
}

fn scan_dir(path: &Path, telemetry: Option<&Telemetry>, partial: &mut PartialScan) -> Result<()> {
    let io_error = |source| Error::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut entries = Vec::new();
    for entry in fs::read_dir(path).map_err(io_error)? {
        entries.push(entry.map_err(io_error)?.path());
    }
    // Keep deterministic ordering of directory listings.
    entries.sort_by(|a, b| path_key(a).cmp(&path_key(b)));

    for entry in entries {
        if entry.is_dir() {
            scan_dir(&entry, telemetry, partial)?;
        } else {
            scan_path(&entry, false, telemetry, partial)?;
        }
    }
    Ok(())
}

/// Stand-alone class files abort the run when malformed.
fn scan_class_file(path: &Path, roles: Option<Vec<Value>>, partial: &mut PartialScan) -> Result<()> {
    if is_module_info(&path.to_string_lossy()) {
        return Ok(());
    }
    let data = fs::read(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;
    import_class(&mut partial.model, &data, &path.display().to_string())?;
    partial.class_count += 1;
    if roles.is_some() {
        push_artifact(path_to_uri(path), data.len() as u64, None, roles, &mut partial.artifacts);
    }
    Ok(())
}

/// Archives that cannot be opened are recorded as failures; other inputs continue.
fn scan_archive_file(
    path: &Path,
    roles: Option<Vec<Value>>,
    telemetry: Option<&Telemetry>,
    partial: &mut PartialScan,
) {
    let location = path.display().to_string();
    let span_attributes = [KeyValue::new("classgate.archive", location.clone())];
    let result = with_span(telemetry, "archive.scan", &span_attributes, || {
        let file = fs::File::open(path).map_err(|err| unreadable(&location, err))?;
        let len = file.metadata().map(|meta| meta.len()).unwrap_or(0);
        let archive = ZipArchive::new(file).map_err(|err| unreadable(&location, err))?;
        let index = push_artifact(path_to_uri(path), len, None, roles, &mut partial.artifacts);
        scan_archive(archive, &location, index, partial)
    });
    if let Err(err) = result {
        record_failure(partial, &location, &err);
    }
}

fn scan_archive<R: Read + Seek>(
    mut archive: ZipArchive<R>,
    location: &str,
    artifact_index: i64,
    partial: &mut PartialScan,
) -> Result<()> {
    let mut names = Vec::new();
    for index in 0..archive.len() {
        let entry = archive
            .by_index(index)
            .map_err(|err| unreadable(location, err))?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        // Multi-release variants would redefine the base classes with different content.
        if name.starts_with(MULTI_RELEASE_PREFIX) {
            continue;
        }
        if (name.ends_with(".class") && !is_module_info(&name)) || is_archive_name(&name) {
            names.push((index, name));
        }
    }
    names.sort_by(|a, b| a.1.cmp(&b.1));

    for (index, name) in names {
        let entry_location = format!("{location}!{name}");
        let mut data = Vec::new();
        let read = archive
            .by_index(index)
            .map_err(|err| unreadable(&entry_location, err))
            .and_then(|mut entry| {
                entry
                    .read_to_end(&mut data)
                    .map_err(|err| unreadable(&entry_location, err))
            });
        if let Err(err) = read {
            record_failure(partial, &entry_location, &err);
            continue;
        }

        if is_archive_name(&name) {
            let nested = match ZipArchive::new(Cursor::new(data.as_slice())) {
                Ok(nested) => nested,
                Err(err) => {
                    record_failure(partial, &entry_location, &unreadable(&entry_location, err));
                    continue;
                }
            };
            let nested_index = push_artifact(
                entry_location.clone(),
                data.len() as u64,
                Some(artifact_index),
                None,
                &mut partial.artifacts,
            );
            if let Err(err) = scan_archive(nested, &entry_location, nested_index, partial) {
                record_failure(partial, &entry_location, &err);
            }
            continue;
        }

        match import_class(&mut partial.model, &data, &entry_location) {
            Ok(_) => partial.class_count += 1,
            Err(err @ (Error::MalformedInput { .. } | Error::ConflictingClass(_))) => {
                record_failure(partial, &entry_location, &err);
            }
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

fn record_failure(partial: &mut PartialScan, location: &str, err: &Error) {
    warn!(location, error = %err, "skipping unreadable input");
    partial.failures.push(ScanFailure {
        location: location.to_string(),
        message: err.to_string(),
    });
}

fn unreadable(location: &str, err: impl std::fmt::Display) -> Error {
    Error::UnreadableArchive {
        location: location.to_string(),
        reason: err.to_string(),
    }
}

fn push_artifact(
    uri: String,
    len: u64,
    parent_index: Option<i64>,
    roles: Option<Vec<Value>>,
    artifacts: &mut Vec<Artifact>,
) -> i64 {
    let location = ArtifactLocation::builder().uri(uri).build();
    let artifact = match (parent_index, roles) {
        (Some(parent_index), Some(roles)) => Artifact::builder()
            .location(location)
            .length(len as i64)
            .parent_index(parent_index)
            .roles(roles)
            .build(),
        (Some(parent_index), None) => Artifact::builder()
            .location(location)
            .length(len as i64)
            .parent_index(parent_index)
            .build(),
        (None, Some(roles)) => Artifact::builder()
            .location(location)
            .length(len as i64)
            .roles(roles)
            .build(),
        (None, None) => Artifact::builder()
            .location(location)
            .length(len as i64)
            .build(),
    };
    let index = artifacts.len() as i64;
    artifacts.push(artifact);
    index
}

fn path_to_uri(path: &Path) -> String {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(path)
    };
    format!("file://{}", absolute.to_string_lossy())
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(extension))
}

fn is_archive_path(path: &Path) -> bool {
    ARCHIVE_EXTENSIONS
        .iter()
        .any(|extension| has_extension(path, extension))
}

fn is_archive_name(name: &str) -> bool {
    is_archive_path(Path::new(name))
}

fn is_module_info(name: &str) -> bool {
    name.ends_with("module-info.class")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_harness::{archive_bytes, class_using, write_archive};

    #[test]
    fn rejects_malformed_class_file() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let class_path = temp_dir.path().join("bad.class");
        fs::write(&class_path, b"nope").expect("write test class");

        let result = scan_inputs(&[class_path], None);

        assert!(matches!(result, Err(Error::MalformedInput { .. })));
    }

    #[test]
    fn accepts_class_file_and_records_artifact() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let class_path = temp_dir.path().join("Foo.class");
        fs::write(&class_path, class_using("com/a/Foo", &["com/b/Bar"])).expect("write class");

        let result = scan_inputs(&[class_path], None).expect("scan class");

        assert_eq!(result.class_count, 1);
        assert_eq!(result.artifacts.len(), 1);
        assert!(result.model.class_named("com.a.Foo").is_some());
        assert!(result.failures.is_empty());
    }

    #[test]
    fn walks_directories_recursively() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let nested = temp_dir.path().join("com").join("a");
        fs::create_dir_all(&nested).expect("create dirs");
        fs::write(nested.join("Foo.class"), class_using("com/a/Foo", &[])).expect("write");
        fs::write(nested.join("Bar.class"), class_using("com/a/Bar", &[])).expect("write");
        fs::write(nested.join("notes.txt"), b"ignored").expect("write");

        let result = scan_inputs(&[temp_dir.path().to_path_buf()], None).expect("scan dir");

        assert_eq!(result.class_count, 2);
        assert_eq!(result.model.defined_classes().count(), 2);
    }

    #[test]
    fn malformed_archive_entry_does_not_stop_siblings() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let jar_path = temp_dir.path().join("app.jar");
        write_archive(
            &jar_path,
            &[
                ("com/a/Bad.class", b"garbage".to_vec()),
                ("com/a/Foo.class", class_using("com/a/Foo", &[])),
                ("META-INF/MANIFEST.MF", b"Manifest-Version: 1.0\n".to_vec()),
            ],
        );

        let result = scan_inputs(&[jar_path], None).expect("scan jar");

        assert_eq!(result.class_count, 1);
        assert!(result.model.class_named("com.a.Foo").is_some());
        assert_eq!(result.failures.len(), 1);
        assert!(result.failures[0].location.ends_with("app.jar!com/a/Bad.class"));
    }

    #[test]
    fn multi_release_variants_are_skipped() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let jar_path = temp_dir.path().join("mr.jar");
        write_archive(
            &jar_path,
            &[
                (
                    "META-INF/versions/11/com/a/Foo.class",
                    class_using("com/a/Foo", &["com/b/Newer"]),
                ),
                ("com/a/Foo.class", class_using("com/a/Foo", &[])),
                ("com/a/Zed.class", class_using("com/a/Zed", &[])),
            ],
        );

        let result = scan_inputs(&[jar_path], None).expect("scan jar");

        assert!(result.failures.is_empty());
        assert_eq!(result.class_count, 2);
        assert!(result.model.class_named("com.a.Zed").is_some());
        assert!(result.model.class_named("com.b.Newer").is_none());
    }

    #[test]
    fn conflicting_entry_in_archive_does_not_stop_siblings() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let jar_path = temp_dir.path().join("dup.jar");
        write_archive(
            &jar_path,
            &[
                ("a/com/a/Foo.class", class_using("com/a/Foo", &["com/b/Bar"])),
                ("b/com/a/Foo.class", class_using("com/a/Foo", &[])),
                ("c/com/a/Zed.class", class_using("com/a/Zed", &[])),
            ],
        );

        let result = scan_inputs(&[jar_path], None).expect("scan jar");

        assert_eq!(result.class_count, 2);
        assert!(result.model.class_named("com.a.Zed").is_some());
        assert_eq!(result.failures.len(), 1);
        assert!(result.failures[0].location.ends_with("dup.jar!b/com/a/Foo.class"));
    }

    #[test]
    fn nested_archives_are_scanned() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let inner = archive_bytes(&[("com/b/Bar.class", class_using("com/b/Bar", &[]))]);
        let war_path = temp_dir.path().join("app.war");
        write_archive(
            &war_path,
            &[
                ("WEB-INF/classes/com/a/Foo.class", class_using("com/a/Foo", &["com/b/Bar"])),
                ("WEB-INF/lib/lib.jar", inner),
            ],
        );

        let result = scan_inputs(&[war_path], None).expect("scan war");

        assert_eq!(result.class_count, 2);
        let bar = result.model.class_named("com.b.Bar").expect("bar");
        assert!(result.model.class(bar).is_defined());
        assert_eq!(result.artifacts.len(), 2);
        assert_eq!(result.artifacts[1].parent_index, Some(0));
    }

    #[test]
    fn unreadable_archive_is_recorded_and_other_inputs_continue() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let broken = temp_dir.path().join("broken.jar");
        fs::write(&broken, b"not a zip").expect("write");
        let class_path = temp_dir.path().join("Foo.class");
        fs::write(&class_path, class_using("com/a/Foo", &[])).expect("write class");

        let result = scan_inputs(&[broken, class_path], None).expect("scan");

        assert_eq!(result.class_count, 1);
        assert_eq!(result.failures.len(), 1);
        assert!(result.failures[0].message.starts_with("unreadable archive"));
    }

    #[test]
    fn conflicting_definitions_across_inputs_fail() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let first = temp_dir.path().join("first.jar");
        let second = temp_dir.path().join("second.jar");
        write_archive(&first, &[("com/a/Foo.class", class_using("com/a/Foo", &[]))]);
        write_archive(
            &second,
            &[("com/a/Foo.class", class_using("com/a/Foo", &["com/b/Bar"]))],
        );

        let result = scan_inputs(&[first, second], None);

        assert!(matches!(result, Err(Error::ConflictingClass(name)) if name == "com.a.Foo"));
    }
}
