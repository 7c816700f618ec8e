use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::{debug, info};

use crate::error::{AppError, Result};
use crate::llm::media::is_supported_image;
use crate::pipeline::component::{display_name_for_path, ComponentKind, Reference};

const INFERRED_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// One portrait the sweep applies components to.
#[derive(Debug, Clone)]
pub struct Subject {
    pub path: PathBuf,
    pub display_name: String,
}

impl Subject {
    fn new(path: PathBuf) -> Self {
        let display_name = display_name_for_path(&path);
        Subject { path, display_name }
    }
}

/// Expands user inputs into concrete reference lists. All paths resolve
/// relative to the workspace root.
pub struct Resolver {
    root: PathBuf,
}

/// Try the path as given, then with inferred extensions when it has none.
fn infer_extension(path: &Path) -> Option<PathBuf> {
    if path.exists() {
        return Some(path.to_path_buf());
    }
    if path.extension().is_some() {
        return None;
    }
    for ext in INFERRED_EXTENSIONS {
        let candidate = path.with_extension(ext);
        if candidate.exists() {
            return Some(candidate);
        }
    }
    None
}

fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|err| AppError::file(dir, err))?;
    let mut images: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && is_supported_image(path))
        .collect();
    images.sort_by_key(|path| path.file_name().map(|name| name.to_os_string()));
    Ok(images)
}

impl Resolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Resolver { root: root.into() }
    }

    fn workspace_path(&self, input: &str) -> PathBuf {
        let path = Path::new(input);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Resolve one slot to its ordered reference list. Empty input yields the
    /// single unset sentinel so the sweep product always multiplies by one.
    pub fn resolve_slot(
        &self,
        kind: ComponentKind,
        input: Option<&str>,
    ) -> Result<Vec<Reference>> {
        let Some(input) = input.map(str::trim).filter(|value| !value.is_empty()) else {
            return Ok(vec![Reference::unset(kind)]);
        };

        let candidate = self.workspace_path(input);

        if candidate.is_dir() {
            let images = list_images(&candidate)?;
            if images.is_empty() {
                return Err(AppError::validation(format!(
                    "no image files found in directory {}",
                    candidate.display()
                )));
            }
            return Ok(images
                .into_iter()
                .map(|path| Reference::image(kind, path))
                .collect());
        }

        if let Some(resolved) = infer_extension(&candidate) {
            let resolved = if kind == ComponentKind::Outfit {
                self.stabilize_outfit_path(&resolved)?
            } else {
                resolved
            };
            return Ok(vec![Reference::image(kind, resolved)]);
        }

        if kind.accepts_text() {
            debug!("Treating {} input as a text description", kind.as_str());
            return Ok(vec![Reference::text(kind, input.to_string())]);
        }

        Err(AppError::validation(format!(
            "{} requires an image reference, and no file matched '{input}'",
            kind.label()
        )))
    }

    /// Resolve the sweep's subjects. Named subjects are looked up under
    /// `subjects/`; with no names, every image in the directory is used.
    pub fn resolve_subjects(&self, names: Option<&str>) -> Result<Vec<Subject>> {
        let subjects_dir = self.root.join("subjects");

        match names.map(str::trim).filter(|value| !value.is_empty()) {
            None => {
                let images = list_images(&subjects_dir)?;
                if images.is_empty() {
                    return Err(AppError::validation(format!(
                        "no image files found in {}",
                        subjects_dir.display()
                    )));
                }
                Ok(images.into_iter().map(Subject::new).collect())
            }
            Some(names) => {
                let mut subjects = Vec::new();
                for name in names.split_whitespace() {
                    let candidate = subjects_dir.join(name);
                    let resolved = infer_extension(&candidate).ok_or_else(|| {
                        AppError::validation(format!(
                            "subject not found: {}",
                            candidate.display()
                        ))
                    })?;
                    subjects.push(Subject::new(resolved));
                }
                Ok(subjects)
            }
        }
    }

    /// Outfit identities should stay stable across runs, so references from
    /// outside the workspace are copied into `outfits/`. A basename collision
    /// gets a timestamp suffix rather than clobbering the existing file.
    fn stabilize_outfit_path(&self, path: &Path) -> Result<PathBuf> {
        let outfits_dir = self.root.join("outfits");
        fs::create_dir_all(&outfits_dir).map_err(|err| AppError::file(&outfits_dir, err))?;

        let absolute = path
            .canonicalize()
            .map_err(|err| AppError::file(path, err))?;
        let outfits_abs = outfits_dir
            .canonicalize()
            .map_err(|err| AppError::file(&outfits_dir, err))?;
        if absolute.starts_with(&outfits_abs) {
            return Ok(path.to_path_buf());
        }

        let file_name = absolute
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "outfit.png".to_string());
        let mut dest = outfits_dir.join(&file_name);
        if dest.exists() {
            let stem = Path::new(&file_name)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "outfit".to_string());
            let ext = Path::new(&file_name)
                .extension()
                .map(|e| e.to_string_lossy().into_owned())
                .unwrap_or_else(|| "png".to_string());
            let stamp = Local::now().format("%Y%m%d_%H%M%S");
            dest = outfits_dir.join(format!("{stem}_{stamp}.{ext}"));
        }

        fs::copy(&absolute, &dest).map_err(|err| AppError::file(&dest, err))?;
        info!(
            "Copied external outfit image into workspace: {} -> {}",
            absolute.display(),
            dest.display()
        );
        Ok(dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::component::ReferenceSource;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"img").unwrap();
    }

    #[test]
    fn empty_slot_produces_single_sentinel() {
        let tmp = TempDir::new().unwrap();
        let resolver = Resolver::new(tmp.path());
        for kind in ComponentKind::ALL {
            let refs = resolver.resolve_slot(kind, None).unwrap();
            assert_eq!(refs.len(), 1);
            assert!(!refs[0].is_set());
        }
    }

    #[test]
    fn directory_enumerates_sorted_images() {
        let tmp = TempDir::new().unwrap();
        touch(&tmp.path().join("styles/b.png"));
        touch(&tmp.path().join("styles/a.jpg"));
        touch(&tmp.path().join("styles/c.webp"));
        touch(&tmp.path().join("styles/notes.txt"));
        fs::create_dir_all(tmp.path().join("styles/nested")).unwrap();
        touch(&tmp.path().join("styles/nested/d.png"));

        let resolver = Resolver::new(tmp.path());
        let refs = resolver
            .resolve_slot(ComponentKind::Style, Some("styles"))
            .unwrap();
        let names: Vec<&str> = refs.iter().map(|r| r.display_name.as_str()).collect();
        // Non-recursive, extension-filtered, filename-sorted.
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn missing_extension_is_inferred() {
        let tmp = TempDir::new().unwrap();
        touch(&tmp.path().join("styles/noir.jpg"));

        let resolver = Resolver::new(tmp.path());
        let refs = resolver
            .resolve_slot(ComponentKind::Style, Some("styles/noir"))
            .unwrap();
        assert_eq!(
            refs[0].image_path().unwrap(),
            tmp.path().join("styles/noir.jpg")
        );
    }

    #[test]
    fn free_text_allowed_except_for_style() {
        let tmp = TempDir::new().unwrap();
        let resolver = Resolver::new(tmp.path());

        let refs = resolver
            .resolve_slot(ComponentKind::HairColor, Some("platinum blonde"))
            .unwrap();
        assert!(matches!(refs[0].source, ReferenceSource::Text(_)));

        let err = resolver
            .resolve_slot(ComponentKind::Style, Some("moody noir lighting"))
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn external_outfit_is_copied_into_workspace() {
        let tmp = TempDir::new().unwrap();
        let external = TempDir::new().unwrap();
        let source = external.path().join("jacket.png");
        fs::write(&source, b"external-bytes").unwrap();

        let resolver = Resolver::new(tmp.path());
        let refs = resolver
            .resolve_slot(ComponentKind::Outfit, Some(source.to_str().unwrap()))
            .unwrap();

        let resolved = refs[0].image_path().unwrap();
        assert!(resolved.starts_with(tmp.path().join("outfits")));
        assert!(resolved.exists());
        // Original stays put.
        assert!(source.exists());
    }

    #[test]
    fn outfit_inside_workspace_is_left_alone() {
        let tmp = TempDir::new().unwrap();
        let inside = tmp.path().join("outfits/suit.png");
        touch(&inside);

        let resolver = Resolver::new(tmp.path());
        let refs = resolver
            .resolve_slot(ComponentKind::Outfit, Some("outfits/suit.png"))
            .unwrap();
        assert_eq!(refs[0].image_path().unwrap(), inside);
        // No duplicate copies appeared.
        assert_eq!(list_images(&tmp.path().join("outfits")).unwrap().len(), 1);
    }

    #[test]
    fn subjects_default_to_whole_directory() {
        let tmp = TempDir::new().unwrap();
        touch(&tmp.path().join("subjects/kat.png"));
        touch(&tmp.path().join("subjects/jaimee.jpg"));

        let resolver = Resolver::new(tmp.path());
        let subjects = resolver.resolve_subjects(None).unwrap();
        let names: Vec<&str> = subjects.iter().map(|s| s.display_name.as_str()).collect();
        assert_eq!(names, vec!["jaimee", "kat"]);

        let picked = resolver.resolve_subjects(Some("kat")).unwrap();
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].display_name, "kat");

        assert!(resolver.resolve_subjects(Some("nobody")).is_err());
    }
}
