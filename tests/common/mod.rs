#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use bill_harmonizer::registry::Registry;
use tempfile::{TempDir, tempdir};

/// A small mapping covering every category.
pub const MAPPING: &str = r#"
version: "test-1"
categories:
  - category: identifier
    fields:
      - name: state
        variants: ["State", "ST"]
      - name: bill_number
        variants: ["Bill Number", "BillNumber"]
      - name: bill_type
        variants: ["Bill Type"]
  - category: status
    fields:
      - name: introduced
        variants: ["Introduced"]
      - name: enacted
        variants: ["Enacted", "Law"]
  - category: policy_category
    fields:
      - name: abortion
        variants: ["Abortion"]
      - name: period_products
        variants: ["Period Products", "Menstrual Products"]
  - category: intent
    fields:
      - name: positive
        variants: ["Positive"]
  - category: date
    fields:
      - name: last_action_date
        variants: ["Last Action Date", "Last Action"]
  - category: free_text
    fields:
      - name: description
        variants: ["Description"]
"#;

pub fn registry() -> Registry {
    Registry::from_yaml_str(MAPPING).expect("test mapping loads")
}

/// Path to the mapping file shipped in `config/`.
pub fn shipped_mapping() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("config")
        .join("field_mappings.yaml")
}

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Creates `name` as a directory under the workspace and returns it.
    pub fn dir(&self, name: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        std::fs::create_dir_all(&path).expect("create workspace dir");
        path
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent dir");
        }
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }

    /// Writes an executable shell script standing in for an export tool.
    #[cfg(unix)]
    pub fn shim(&self, name: &str, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = self.write(name, &format!("#!/bin/sh\n{body}\n"));
        let mut permissions = std::fs::metadata(&path)
            .expect("shim metadata")
            .permissions();
        permissions.set_mode(0o755);
        std::fs::set_permissions(&path, permissions).expect("make shim executable");
        path
    }
}
