use std::collections::HashMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::error::ProfileError;
use crate::types::{
    NotificationConfig, NotificationFile, Profile, ProfileFile, ProfileSpec, RoutingConfig,
    RoutingFile, Stage, StageFile,
};

static PROFILE_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9_-]{0,63}$").unwrap());

static STAGE_SLUG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").unwrap());

/// Note-type labels the default pipeline understands without a profile file.
const BUILTIN_IDS: &[&str] = &["meeting", "supervision", "client", "lecture", "braindump"];

const FOLDER_MAP_FILE: &str = "folder_map.yaml";

#[derive(Debug, Default, Serialize, Deserialize)]
struct FolderMapFile {
    #[serde(default)]
    folder_map: HashMap<String, String>,
}

/// Loads and owns the in-memory set of profiles.
///
/// Readers receive `Arc<Profile>` snapshots; a reload builds a complete new
/// map and swaps it in one assignment, so no reader ever observes a
/// half-built set. All writes (create, delete, reload, folder mapping) take
/// the internal locks across the swap.
pub struct ProfileRegistry {
    profiles_dir: PathBuf,
    prompts_dir: PathBuf,
    profiles: RwLock<Arc<HashMap<String, Arc<Profile>>>>,
    folder_map: RwLock<HashMap<String, String>>,
}

impl ProfileRegistry {
    /// Create a registry over `<config>/profiles` and `<config>/prompts`
    /// and perform the initial load.
    ///
    /// # Errors
    ///
    /// Returns `ProfileError::Io` if the directories cannot be created.
    pub fn open(profiles_dir: PathBuf, prompts_dir: PathBuf) -> Result<Self, ProfileError> {
        fs::create_dir_all(&profiles_dir).map_err(|e| ProfileError::io(&profiles_dir, e))?;
        fs::create_dir_all(&prompts_dir).map_err(|e| ProfileError::io(&prompts_dir, e))?;
        let registry = Self {
            profiles_dir,
            prompts_dir,
            profiles: RwLock::new(Arc::new(HashMap::new())),
            folder_map: RwLock::new(HashMap::new()),
        };
        registry.reload()?;
        Ok(registry)
    }

    /// Look up a profile by its stable id (the definition's filename stem).
    #[must_use]
    pub fn get(&self, profile_id: &str) -> Option<Arc<Profile>> {
        self.snapshot().get(profile_id).cloned()
    }

    /// Snapshot of all loaded profiles keyed by id.
    #[must_use]
    pub fn all(&self) -> Arc<HashMap<String, Arc<Profile>>> {
        self.snapshot()
    }

    fn snapshot(&self) -> Arc<HashMap<String, Arc<Profile>>> {
        match self.profiles.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Whether an id names a built-in note type of the default pipeline.
    #[must_use]
    pub fn is_builtin(profile_id: &str) -> bool {
        BUILTIN_IDS.contains(&profile_id)
    }

    /// Whether jobs may be submitted under this id: a loaded profile or a
    /// built-in note type.
    #[must_use]
    pub fn accepts(&self, profile_id: &str) -> bool {
        Self::is_builtin(profile_id) || self.get(profile_id).is_some()
    }

    /// Re-read every definition from disk and swap the in-memory map.
    ///
    /// The map is rebuilt from scratch so profiles whose files were deleted
    /// do not linger as stale entries.
    ///
    /// # Errors
    ///
    /// Returns `ProfileError::Io` when the profiles directory is unreadable.
    /// Individual malformed profile files are logged and skipped.
    pub fn reload(&self) -> Result<(), ProfileError> {
        let mut fresh: HashMap<String, Arc<Profile>> = HashMap::new();

        let entries =
            fs::read_dir(&self.profiles_dir).map_err(|e| ProfileError::io(&self.profiles_dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| ProfileError::io(&self.profiles_dir, e))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if path.file_name().and_then(|n| n.to_str()) == Some(FOLDER_MAP_FILE) {
                continue;
            }

            match self.load_profile_file(&path, stem) {
                Ok(profile) => {
                    info!(
                        profile_id = stem,
                        name = %profile.name,
                        stages = profile.stages.len(),
                        "loaded profile"
                    );
                    fresh.insert(stem.to_string(), Arc::new(profile));
                }
                Err(e) => {
                    error!(path = %path.display(), error = %e, "failed to load profile, skipping");
                }
            }
        }

        let folder_map = self.load_folder_map();

        {
            let mut guard = write_guard(&self.profiles);
            *guard = Arc::new(fresh);
        }
        {
            let mut guard = write_guard(&self.folder_map);
            *guard = folder_map;
        }
        Ok(())
    }

    fn load_profile_file(&self, path: &Path, id: &str) -> Result<Profile, ProfileError> {
        let raw = fs::read_to_string(path).map_err(|e| ProfileError::io(path, e))?;
        let file: ProfileFile = serde_yaml::from_str(&raw).map_err(|source| ProfileError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        let mut stages = Vec::with_capacity(file.stages.len());
        for stage_file in file.stages {
            stages.push(self.load_stage(stage_file));
        }

        Ok(Profile {
            id: id.to_string(),
            name: file.name,
            description: file.description,
            skip_diarization: file.skip_diarization,
            priority: file.priority,
            stages,
            routing: file.routing.map(|r| RoutingConfig {
                share_folder: r.share_folder,
                subfolder: r.subfolder,
            }),
            notifications: file.notifications.map(notification_from_file),
        })
    }

    fn load_stage(&self, file: StageFile) -> Stage {
        let prompt_template = match self.safe_prompt_path(&file.prompt_file) {
            Ok(path) if path.exists() => match fs::read_to_string(&path) {
                Ok(body) => body,
                Err(e) => {
                    error!(path = %path.display(), error = %e, "failed to read prompt file");
                    format!("ERROR: could not load prompt from {}", file.prompt_file)
                }
            },
            Ok(path) => {
                error!(path = %path.display(), "prompt file not found");
                format!("ERROR: prompt file not found: {}", file.prompt_file)
            }
            Err(e) => {
                error!(prompt_file = %file.prompt_file, error = %e, "unsafe prompt path");
                format!("ERROR: invalid prompt path: {}", file.prompt_file)
            }
        };

        Stage {
            name: file.name,
            prompt_file: file.prompt_file,
            prompt_template,
            system_message: file.system_message,
            model: file.model,
            provider: Some(file.provider).filter(|p| !p.is_empty()),
            temperature: file.temperature,
            max_tokens: file.max_tokens,
            timeout_secs: file.timeout,
            requires_previous: file.requires_previous,
            save_intermediate: file.save_intermediate,
            filename_suffix: file.filename_suffix,
        }
    }

    /// Resolve a prompt file path, refusing absolute paths and upward
    /// traversal so prompt writes can never escape the prompts root.
    fn safe_prompt_path(&self, prompt_file: &str) -> Result<PathBuf, ProfileError> {
        let relative = Path::new(prompt_file);
        if relative.is_absolute()
            || relative
                .components()
                .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(ProfileError::UnsafePromptPath {
                path: prompt_file.to_string(),
            });
        }
        Ok(self.prompts_dir.join(relative))
    }

    /// Write a new profile definition and its prompt bodies, then reload.
    ///
    /// On any write failure every partially written file is removed before
    /// the error returns. The new profile's id is auto-registered as an
    /// inbound-folder mapping.
    ///
    /// # Errors
    ///
    /// `InvalidId` for malformed ids, `Conflict` when the id is taken,
    /// `UnsafePromptPath` for escaping prompt paths, `Io`/`Serialize` on
    /// write failure.
    pub fn create_profile(&self, spec: &ProfileSpec) -> Result<Arc<Profile>, ProfileError> {
        if !PROFILE_ID_RE.is_match(&spec.id) {
            return Err(ProfileError::InvalidId {
                id: spec.id.clone(),
            });
        }
        if self.get(&spec.id).is_some() {
            return Err(ProfileError::Conflict {
                id: spec.id.clone(),
            });
        }

        // Resolve prompt paths up front so nothing is written on rejection.
        let mut stage_files = Vec::with_capacity(spec.stages.len());
        let mut prompt_writes: Vec<(PathBuf, &str)> = Vec::with_capacity(spec.stages.len());
        for (index, stage) in spec.stages.iter().enumerate() {
            let prompt_file = match &stage.prompt_file {
                Some(path) => path.clone(),
                None => format!(
                    "{}/stage_{}_{}.md",
                    spec.id,
                    index + 1,
                    stage_slug(&stage.name)
                ),
            };
            let resolved = self.safe_prompt_path(&prompt_file)?;
            prompt_writes.push((resolved, stage.prompt_content.as_str()));
            stage_files.push(StageFile {
                name: stage.name.clone(),
                prompt_file,
                system_message: String::new(),
                model: stage.model.clone(),
                provider: stage.provider.clone().unwrap_or_default(),
                temperature: stage.temperature,
                max_tokens: stage.max_tokens,
                timeout: 120,
                requires_previous: stage.requires_previous,
                save_intermediate: stage.save_intermediate,
                filename_suffix: stage.filename_suffix.clone(),
            });
        }

        let file = ProfileFile {
            name: spec.name.clone(),
            description: spec.description.clone(),
            skip_diarization: spec.skip_diarization,
            priority: spec.priority,
            stages: stage_files,
            routing: spec.routing_folder.as_ref().map(|folder| RoutingFile {
                share_folder: folder.clone(),
                subfolder: spec.routing_subfolder.clone().unwrap_or_default(),
            }),
            notifications: spec.notifications.as_ref().map(|n| NotificationFile {
                ntfy_topic: n.ntfy_topic.clone(),
                ntfy_url: n.ntfy_url.clone(),
                webhook_url: n.webhook_url.clone(),
                pushover_user: n.pushover_user.clone(),
                pushover_token: n.pushover_token.clone(),
                email_to: n.email_to.clone(),
                email_cc: n.email_cc.clone(),
            }),
        };

        let yaml_path = self.profiles_dir.join(format!("{}.yaml", spec.id));
        let yaml = serde_yaml::to_string(&file)?;

        let mut written: Vec<PathBuf> = Vec::new();
        fs::write(&yaml_path, &yaml).map_err(|e| ProfileError::io(&yaml_path, e))?;
        written.push(yaml_path.clone());

        for (path, content) in &prompt_writes {
            let result = (|| -> Result<(), ProfileError> {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent).map_err(|e| ProfileError::io(parent, e))?;
                }
                fs::write(path, content).map_err(|e| ProfileError::io(path, e))
            })();
            match result {
                Ok(()) => written.push(path.clone()),
                Err(e) => {
                    for stale in &written {
                        if let Err(cleanup) = fs::remove_file(stale) {
                            warn!(path = %stale.display(), error = %cleanup, "cleanup failed");
                        }
                    }
                    return Err(e);
                }
            }
        }

        self.reload()?;
        self.set_folder_mapping(&spec.id, &spec.id)?;

        self.get(&spec.id).ok_or_else(|| ProfileError::NotFound {
            id: spec.id.clone(),
        })
    }

    /// Delete a profile definition, its prompt subtree, and its folder
    /// mapping, then reload.
    ///
    /// # Errors
    ///
    /// `BuiltIn` for built-in note types, `NotFound` when no such profile is
    /// loaded.
    pub fn delete_profile(&self, profile_id: &str) -> Result<(), ProfileError> {
        if Self::is_builtin(profile_id) {
            return Err(ProfileError::BuiltIn {
                id: profile_id.to_string(),
            });
        }
        if self.get(profile_id).is_none() {
            return Err(ProfileError::NotFound {
                id: profile_id.to_string(),
            });
        }

        let yaml_path = self.profiles_dir.join(format!("{profile_id}.yaml"));
        if yaml_path.exists() {
            fs::remove_file(&yaml_path).map_err(|e| ProfileError::io(&yaml_path, e))?;
        }
        let prompt_subtree = self.prompts_dir.join(profile_id);
        if prompt_subtree.is_dir() {
            fs::remove_dir_all(&prompt_subtree).map_err(|e| ProfileError::io(&prompt_subtree, e))?;
        }

        self.reload()?;
        self.remove_folder_mapping(profile_id)?;
        info!(profile_id, "deleted profile");
        Ok(())
    }

    /// Read the prompt body for one stage.
    ///
    /// # Errors
    ///
    /// `NotFound` / `StageOutOfRange` when the target does not exist.
    pub fn stage_prompt(
        &self,
        profile_id: &str,
        stage_index: usize,
    ) -> Result<(String, String), ProfileError> {
        let profile = self.get(profile_id).ok_or_else(|| ProfileError::NotFound {
            id: profile_id.to_string(),
        })?;
        let stage = profile
            .stages
            .get(stage_index)
            .ok_or(ProfileError::StageOutOfRange {
                id: profile_id.to_string(),
                index: stage_index,
            })?;
        Ok((stage.prompt_template.clone(), stage.prompt_file.clone()))
    }

    /// Overwrite the prompt body for one stage and reload so in-memory
    /// templates match disk.
    ///
    /// # Errors
    ///
    /// `NotFound` / `StageOutOfRange` / `UnsafePromptPath` / `Io`.
    pub fn update_stage_prompt(
        &self,
        profile_id: &str,
        stage_index: usize,
        body: &str,
    ) -> Result<String, ProfileError> {
        let profile = self.get(profile_id).ok_or_else(|| ProfileError::NotFound {
            id: profile_id.to_string(),
        })?;
        let stage = profile
            .stages
            .get(stage_index)
            .ok_or(ProfileError::StageOutOfRange {
                id: profile_id.to_string(),
                index: stage_index,
            })?;

        let path = self.safe_prompt_path(&stage.prompt_file)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ProfileError::io(parent, e))?;
        }
        fs::write(&path, body).map_err(|e| ProfileError::io(&path, e))?;
        self.reload()?;
        Ok(stage.prompt_file.clone())
    }

    /// Current inbound-folder → profile mapping.
    #[must_use]
    pub fn folder_map(&self) -> HashMap<String, String> {
        match self.folder_map.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Profile mapped to an inbound folder, keyed case-insensitively.
    #[must_use]
    pub fn profile_for_folder(&self, folder: &str) -> Option<String> {
        let key = folder.to_lowercase();
        match self.folder_map.read() {
            Ok(guard) => guard.get(&key).cloned(),
            Err(poisoned) => poisoned.into_inner().get(&key).cloned(),
        }
    }

    /// Add or update a folder mapping and persist the map.
    ///
    /// # Errors
    ///
    /// Returns `ProfileError::Io`/`Serialize` when the map cannot be written.
    pub fn set_folder_mapping(&self, folder: &str, profile_id: &str) -> Result<(), ProfileError> {
        {
            let mut guard = write_guard(&self.folder_map);
            guard.insert(folder.to_lowercase(), profile_id.to_string());
        }
        self.save_folder_map()
    }

    /// Remove a folder mapping and persist the map.
    ///
    /// # Errors
    ///
    /// Returns `ProfileError::Io`/`Serialize` when the map cannot be written.
    pub fn remove_folder_mapping(&self, folder: &str) -> Result<(), ProfileError> {
        let removed = {
            let mut guard = write_guard(&self.folder_map);
            guard.remove(&folder.to_lowercase()).is_some()
        };
        if removed {
            self.save_folder_map()?;
        }
        Ok(())
    }

    fn load_folder_map(&self) -> HashMap<String, String> {
        let path = self.profiles_dir.join(FOLDER_MAP_FILE);
        if !path.exists() {
            return HashMap::new();
        }
        match fs::read_to_string(&path)
            .map_err(|e| e.to_string())
            .and_then(|raw| serde_yaml::from_str::<FolderMapFile>(&raw).map_err(|e| e.to_string()))
        {
            Ok(file) => file
                .folder_map
                .into_iter()
                .map(|(k, v)| (k.to_lowercase(), v))
                .collect(),
            Err(e) => {
                error!(path = %path.display(), error = %e, "failed to load folder map");
                HashMap::new()
            }
        }
    }

    fn save_folder_map(&self) -> Result<(), ProfileError> {
        let path = self.profiles_dir.join(FOLDER_MAP_FILE);
        let file = FolderMapFile {
            folder_map: self.folder_map(),
        };
        let yaml = serde_yaml::to_string(&file)?;
        fs::write(&path, yaml).map_err(|e| ProfileError::io(&path, e))
    }
}

fn write_guard<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn notification_from_file(file: NotificationFile) -> NotificationConfig {
    NotificationConfig {
        ntfy_topic: file.ntfy_topic,
        ntfy_url: file.ntfy_url,
        webhook_url: file.webhook_url,
        pushover_user: file.pushover_user,
        pushover_token: file.pushover_token,
        email_to: file.email_to,
        email_cc: file.email_cc,
    }
}

fn stage_slug(name: &str) -> String {
    STAGE_SLUG_RE
        .replace_all(&name.to_lowercase(), "_")
        .trim_matches('_')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StageSpec;

    fn registry(dir: &Path) -> ProfileRegistry {
        ProfileRegistry::open(dir.join("profiles"), dir.join("prompts")).unwrap()
    }

    fn spec(id: &str, name: &str) -> ProfileSpec {
        ProfileSpec {
            id: id.to_string(),
            name: name.to_string(),
            description: "test profile".into(),
            skip_diarization: true,
            priority: 3,
            stages: vec![
                StageSpec {
                    name: "Clean".into(),
                    prompt_file: None,
                    prompt_content: "Tidy this up:\n\n{transcript}".into(),
                    model: "deepseek-chat".into(),
                    provider: None,
                    temperature: 0.2,
                    max_tokens: 2048,
                    requires_previous: false,
                    save_intermediate: true,
                    filename_suffix: "clean".into(),
                },
                StageSpec {
                    name: "Analyze".into(),
                    prompt_file: None,
                    prompt_content: "Analyze:\n\n{cleaned_transcript}".into(),
                    model: "gpt-4o-mini".into(),
                    provider: Some("openai".into()),
                    temperature: 0.4,
                    max_tokens: 4096,
                    requires_previous: true,
                    save_intermediate: true,
                    filename_suffix: "analysis".into(),
                },
            ],
            routing_folder: None,
            routing_subfolder: None,
            notifications: None,
        }
    }

    #[test]
    fn create_then_lookup_by_id_not_display_name() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(dir.path());

        let created = reg
            .create_profile(&spec("data_protection", "Data Protection"))
            .unwrap();
        assert_eq!(created.id, "data_protection");
        assert_eq!(created.name, "Data Protection");

        // Lookup works by id immediately after creation...
        assert!(reg.get("data_protection").is_some());
        // ...and the display name is not a key.
        assert!(reg.get("Data Protection").is_none());

        // Survives an explicit reload.
        reg.reload().unwrap();
        let loaded = reg.get("data_protection").unwrap();
        assert_eq!(loaded.stages.len(), 2);
        assert_eq!(loaded.stages[0].prompt_template, "Tidy this up:\n\n{transcript}");
        assert_eq!(loaded.stages[1].provider.as_deref(), Some("openai"));
    }

    #[test]
    fn create_registers_folder_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(dir.path());
        reg.create_profile(&spec("biz", "Business")).unwrap();
        assert_eq!(reg.profile_for_folder("BIZ").as_deref(), Some("biz"));
    }

    #[test]
    fn invalid_ids_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(dir.path());
        for bad in ["Data Protection", "UPPER", "-leading", "", "a b"] {
            let err = reg.create_profile(&spec(bad, "x")).unwrap_err();
            assert!(matches!(err, ProfileError::InvalidId { .. }), "id {bad:?}");
        }
    }

    #[test]
    fn duplicate_id_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(dir.path());
        reg.create_profile(&spec("dup", "First")).unwrap();
        let err = reg.create_profile(&spec("dup", "Second")).unwrap_err();
        assert!(matches!(err, ProfileError::Conflict { .. }));
    }

    #[test]
    fn traversal_prompt_paths_are_rejected_and_nothing_is_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(dir.path());
        let mut bad = spec("escape", "Escape");
        bad.stages[0].prompt_file = Some("../outside.md".into());

        let err = reg.create_profile(&bad).unwrap_err();
        assert!(matches!(err, ProfileError::UnsafePromptPath { .. }));
        assert!(!dir.path().join("profiles/escape.yaml").exists());
        assert!(reg.get("escape").is_none());

        let mut absolute = spec("abs", "Abs");
        absolute.stages[0].prompt_file = Some("/etc/passwd".into());
        let err = reg.create_profile(&absolute).unwrap_err();
        assert!(matches!(err, ProfileError::UnsafePromptPath { .. }));
    }

    #[test]
    fn reload_drops_deleted_profiles() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(dir.path());
        reg.create_profile(&spec("ephemeral", "Ephemeral")).unwrap();
        assert!(reg.get("ephemeral").is_some());

        fs::remove_file(dir.path().join("profiles/ephemeral.yaml")).unwrap();
        reg.reload().unwrap();
        assert!(reg.get("ephemeral").is_none());
    }

    #[test]
    fn delete_profile_removes_files_and_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(dir.path());
        reg.create_profile(&spec("gone", "Gone")).unwrap();

        reg.delete_profile("gone").unwrap();
        assert!(reg.get("gone").is_none());
        assert!(!dir.path().join("profiles/gone.yaml").exists());
        assert!(!dir.path().join("prompts/gone").exists());
        assert!(reg.profile_for_folder("gone").is_none());
    }

    #[test]
    fn builtins_cannot_be_deleted_but_are_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(dir.path());
        let err = reg.delete_profile("meeting").unwrap_err();
        assert!(matches!(err, ProfileError::BuiltIn { .. }));
        assert!(reg.accepts("meeting"));
        assert!(!reg.accepts("nonexistent_profile"));
    }

    #[test]
    fn stage_prompt_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(dir.path());
        reg.create_profile(&spec("rw", "ReadWrite")).unwrap();

        let (body, file) = reg.stage_prompt("rw", 0).unwrap();
        assert!(body.contains("{transcript}"));
        assert!(file.starts_with("rw/"));

        reg.update_stage_prompt("rw", 0, "New body: {transcript}").unwrap();
        let (body, _) = reg.stage_prompt("rw", 0).unwrap();
        assert_eq!(body, "New body: {transcript}");

        let err = reg.stage_prompt("rw", 9).unwrap_err();
        assert!(matches!(err, ProfileError::StageOutOfRange { .. }));
    }

    #[test]
    fn folder_map_is_case_insensitive_and_persistent() {
        let dir = tempfile::tempdir().unwrap();
        {
            let reg = registry(dir.path());
            reg.set_folder_mapping("Lectures", "business_lecture").unwrap();
        }
        // A fresh registry over the same directory sees the mapping.
        let reg = registry(dir.path());
        assert_eq!(
            reg.profile_for_folder("lectures").as_deref(),
            Some("business_lecture")
        );
        assert_eq!(
            reg.profile_for_folder("LECTURES").as_deref(),
            Some("business_lecture")
        );

        reg.remove_folder_mapping("LeCtUrEs").unwrap();
        assert!(reg.profile_for_folder("lectures").is_none());
    }

    #[test]
    fn routing_accepts_legacy_folder_key() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(dir.path());
        fs::write(
            dir.path().join("profiles/legacy.yaml"),
            "name: Legacy\nstages: []\nrouting:\n  folder: shared-docs\n  subfolder: keira\n",
        )
        .unwrap();
        reg.reload().unwrap();

        let profile = reg.get("legacy").unwrap();
        let routing = profile.routing.as_ref().unwrap();
        assert_eq!(routing.share_folder, "shared-docs");
        assert_eq!(routing.subfolder, "keira");
    }

    #[test]
    fn missing_prompt_file_yields_error_marker_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(dir.path());
        fs::write(
            dir.path().join("profiles/broken.yaml"),
            "name: Broken\nstages:\n  - name: lost\n    prompt_file: broken/missing.md\n",
        )
        .unwrap();
        reg.reload().unwrap();

        let profile = reg.get("broken").unwrap();
        assert!(profile.stages[0].prompt_template.starts_with("ERROR:"));
    }
}
