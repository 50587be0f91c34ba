//! Staged translation pipeline.
//!
//! Drives the whole flow: validate the project, extract archives, generate
//! translation stubs, parse the tl tree, translate everything untranslated
//! in bulk, splice results back, normalize encodings, and install the
//! runtime hook. Stage transitions and log lines flow out over the event
//! stream; every failure is folded into the returned [`PipelineResult`];
//! this module never returns an error to its caller.

pub mod events;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use regex::Regex;
use std::sync::LazyLock;
use walkdir::WalkDir;

use crate::config::{Config, api_lang_to_renpy, renpy_lang_to_api};
use crate::diagnostics::DiagnosticReport;
use crate::encoding;
use crate::extractors::ExtractorRegistry;
use crate::guard;
use crate::hook;
use crate::parser::{EntryType, ParsedText, RenpyParser, rules::NeverTranslateRules};
use crate::rpa::RpaArchive;
use crate::rpyc;
use crate::tl::{StubGenerator, TlParser, TranslationFile, translation_stats};
use crate::translate::manager::TranslationManager;
use crate::translate::types::{Engine, RequestMetadata, TranslationRequest};

use events::{EventSink, LogLevel, PipelineEvent, PipelineResult, Stage};

pub use events::PipelineEvent as Event;

const SOURCE_EXCLUDES: &[&str] = &["tl", "renpy", "common", "lib", "python-packages", "cache", "saves"];

pub struct Pipeline {
    config: Config,
    manager: Arc<TranslationManager>,
    events: EventSink,
    should_stop: Arc<AtomicBool>,

    project_path: PathBuf,
    target_language: String,
    source_language: String,
    engine: Engine,
    auto_extract: bool,
    template_only: bool,
}

impl Pipeline {
    pub fn new(config: Config, manager: Arc<TranslationManager>, events: EventSink) -> Self {
        let target = api_lang_to_renpy(&config.translation.target_lang);
        let source = config.translation.source_lang.clone();
        let engine = crate::translate::resolve_engine(&config.translation.engine);
        Self {
            config,
            manager,
            events,
            should_stop: Arc::new(AtomicBool::new(false)),
            project_path: PathBuf::new(),
            target_language: target,
            source_language: source,
            engine,
            auto_extract: true,
            template_only: false,
        }
    }

    /// Point the pipeline at a project. `input` may be the project root,
    /// its `game/` directory, or an executable inside either.
    pub fn configure(
        &mut self,
        input: &Path,
        target_language: Option<&str>,
        source_language: Option<&str>,
        engine: Option<Engine>,
        auto_extract: bool,
        template_only: bool,
    ) {
        if let Some(lang) = target_language {
            self.target_language = api_lang_to_renpy(lang);
        }
        if let Some(lang) = source_language {
            self.source_language = lang.to_string();
        }
        if let Some(engine) = engine {
            self.engine = engine;
        }
        self.auto_extract = auto_extract;
        self.template_only = template_only;
        self.project_path = normalize_project_path(input);
    }

    /// Cooperative cancellation: every loop checks this between items.
    /// In-flight adapter calls complete and their results are discarded.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.should_stop.clone()
    }

    pub fn stop(&self) {
        self.should_stop.store(true, Ordering::SeqCst);
    }

    fn stopped(&self) -> bool {
        self.should_stop.load(Ordering::SeqCst)
    }

    pub async fn run(&self) -> PipelineResult {
        self.should_stop.store(false, Ordering::SeqCst);
        let result = self.run_stages().await;
        self.events.finished(result.clone());
        result
    }

    async fn run_stages(&self) -> PipelineResult {
        let mut diagnostics = DiagnosticReport::new();
        diagnostics.target_language = self.target_language.clone();

        // 1. Validate.
        self.events.stage(Stage::Validating, "Checking project layout");
        if self.project_path.as_os_str().is_empty() || !self.project_path.exists() {
            return PipelineResult::failure(
                Stage::Error,
                format!("Input path does not exist: {}", self.project_path.display()),
            );
        }
        diagnostics.project = self
            .project_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let game_dir = self.project_path.join("game");
        if !game_dir.is_dir() {
            return PipelineResult::failure(
                Stage::Error,
                format!("No game/ directory under {}", self.project_path.display()),
            );
        }

        let mut has_rpy = has_files_with_ext(&game_dir, &["rpy"]);
        let has_rpyc = has_files_with_ext(&game_dir, &["rpyc", "rpymc"]);
        let has_rpa = has_files_with_ext(&game_dir, &["rpa"]);
        self.events.log(
            LogLevel::Info,
            format!("Project scan: rpy={has_rpy} rpyc={has_rpyc} rpa={has_rpa}"),
        );

        if self.stopped() {
            return PipelineResult::stopped();
        }

        // 2. Archive extraction.
        if has_rpa && self.auto_extract {
            self.events.stage(Stage::Unrpa, "Extracting archives");
            match self.extract_archives(&game_dir) {
                Ok(count) => {
                    self.events
                        .log(LogLevel::Info, format!("Extracted {count} archived files"));
                    self.cleanup_engine_tl(&game_dir);
                    has_rpy = has_files_with_ext(&game_dir, &["rpy"]);
                }
                Err(e) => {
                    if has_rpy {
                        self.events.log(
                            LogLevel::Warning,
                            format!("Archive extraction failed ({e}), continuing with loose files"),
                        );
                    } else if has_rpyc && self.config.translation.enable_rpyc_reader {
                        self.events.log(
                            LogLevel::Warning,
                            format!("Archive extraction failed ({e}), falling back to compiled scripts"),
                        );
                    } else {
                        return PipelineResult::failure(
                            Stage::Error,
                            format!("Archive extraction failed and no script source exists: {e}"),
                        );
                    }
                }
            }
        }

        // Compiled-only projects need the rpyc reader switched on.
        let rpyc_mode = !has_rpy && has_rpyc;
        if rpyc_mode && !self.config.translation.enable_rpyc_reader {
            return PipelineResult::failure(
                Stage::Error,
                "No .rpy source found and the compiled-script reader is disabled \
                 (set translation.enable_rpyc_reader = true)",
            );
        }
        if !has_rpy && !has_rpyc {
            return PipelineResult::failure(Stage::Error, "No Ren'Py scripts found under game/");
        }

        if self.stopped() {
            return PipelineResult::stopped();
        }

        // 3. Stub generation.
        self.events.stage(
            Stage::Generating,
            format!("Preparing tl/{}", self.target_language),
        );
        let tl_lang_dir = game_dir.join("tl").join(&self.target_language);
        if tl_lang_dir.is_dir() && has_files_with_ext(&tl_lang_dir, &["rpy"]) {
            self.events.log(
                LogLevel::Info,
                format!("tl/{} already exists, skipping generation", self.target_language),
            );
        } else if let Err(e) = self.generate_stubs(&game_dir, &tl_lang_dir, rpyc_mode, &mut diagnostics)
        {
            return PipelineResult::failure(Stage::Error, format!("Stub generation failed: {e}"));
        }

        if self.stopped() {
            return PipelineResult::stopped();
        }

        // 4. Parse the tl tree.
        self.events.stage(Stage::Parsing, "Parsing translation files");
        let tl_parser = TlParser::new();
        let mut tl_files = tl_parser.parse_directory(&tl_lang_dir, Some(&self.should_stop));

        if self.config.translation.enable_deep_scan {
            if let Some(extra) = self.deep_scan(&game_dir, &tl_lang_dir, &tl_files, &tl_parser) {
                tl_files.push(extra);
            }
        }

        let normalized = encoding::normalize_tree(&tl_lang_dir);
        if normalized > 0 {
            self.events.log(
                LogLevel::Info,
                format!("Normalized {normalized} file(s) to UTF-8 with BOM"),
            );
        }

        if tl_files.is_empty() {
            return PipelineResult::failure(
                Stage::Error,
                format!("No translation files found under tl/{}", self.target_language),
            );
        }
        for file in &tl_files {
            diagnostics.add_extracted(&file.file_path, file.entries.len());
        }

        if self.stopped() {
            return PipelineResult::stopped();
        }

        // 5. Translate.
        let untranslated: Vec<(usize, usize)> = tl_files
            .iter()
            .enumerate()
            .flat_map(|(fi, file)| {
                file.entries
                    .iter()
                    .enumerate()
                    .filter(|(_, e)| !e.is_translated())
                    .map(move |(ei, _)| (fi, ei))
            })
            .collect();

        let mut translations: HashMap<String, String> = HashMap::new();
        if untranslated.is_empty() {
            self.events
                .log(LogLevel::Info, "Everything is already translated");
        } else if !self.template_only {
            self.events.stage(
                Stage::Translating,
                format!("Translating {} entries", untranslated.len()),
            );
            match self
                .translate_entries(&tl_files, &untranslated, &mut diagnostics)
                .await
            {
                Some(map) => translations = map,
                None => return PipelineResult::stopped(),
            }
            if translations.is_empty() {
                return PipelineResult::failure(
                    Stage::Error,
                    "Translation produced no results (engine unavailable?)",
                );
            }
        }

        if self.stopped() {
            return PipelineResult::stopped();
        }

        // 6. Save.
        self.events.stage(Stage::Saving, "Writing translations");
        let mut saved_files = 0;
        for file in &mut tl_files {
            if self.stopped() {
                return PipelineResult::stopped();
            }
            if translations.is_empty() {
                break;
            }
            match tl_parser.save_translations(file, &translations) {
                Ok(0) => {}
                Ok(updated) => {
                    saved_files += 1;
                    diagnostics.add_written(&file.file_path, updated);
                }
                Err(e) => {
                    let message = format!("Failed to write {}: {e}", file.file_path.display());
                    self.events.log(LogLevel::Error, message.clone());
                    return PipelineResult::failure(Stage::Error, message);
                }
            }
        }

        // Stale atomic-segment files from older tool versions break games;
        // segments live in strings.json only.
        let stale_segments = tl_lang_dir.join("_rl_segments.rpy");
        if stale_segments.exists() {
            let _ = std::fs::remove_file(&stale_segments);
            let _ = std::fs::remove_file(stale_segments.with_extension("rpyc"));
        }

        // strings.json is keyed by original text; re-key the id-addressed
        // translation map through the entries it belongs to.
        let mut extra_by_original: HashMap<String, String> = HashMap::new();
        for &(fi, ei) in &untranslated {
            let entry = &tl_files[fi].entries[ei];
            if let Some(translated) = translations.get(&entry.translation_id) {
                extra_by_original.insert(entry.original_text.clone(), translated.clone());
            }
        }

        let strings_count =
            self.generate_strings_json(&tl_files, &tl_lang_dir, &extra_by_original, &mut diagnostics);
        self.events.log(
            LogLevel::Info,
            format!("strings.json holds {strings_count} mappings"),
        );

        encoding::normalize_tree(&tl_lang_dir);

        let t = &self.config.translation;
        if t.auto_generate_hook || t.force_runtime_translation {
            if let Err(e) = hook::install_runtime_hook(&game_dir, &self.target_language) {
                self.events
                    .log(LogLevel::Warning, format!("Runtime hook install failed: {e}"));
            }
            if let Err(e) = hook::install_language_init(&game_dir, &self.target_language) {
                self.events.log(
                    LogLevel::Warning,
                    format!("Language init install failed: {e}"),
                );
            }
        }

        let diag_path = tl_lang_dir.join(format!("diagnostic_{}.json", self.target_language));
        if let Err(e) = diagnostics.write(&diag_path) {
            self.events
                .log(LogLevel::Warning, format!("Diagnostics write failed: {e}"));
        }

        crate::translate::persist_cache(&self.config, self.manager.cache());

        let refreshed = tl_parser.parse_directory(&tl_lang_dir, Some(&self.should_stop));
        let stats = translation_stats(&refreshed);
        self.events.stage(
            Stage::Completed,
            format!(
                "{} translated, {} pending, {} file(s) updated",
                stats.translated, stats.untranslated, saved_files
            ),
        );

        PipelineResult {
            success: true,
            message: format!(
                "Translated {} entries into tl/{}",
                translations.len(),
                self.target_language
            ),
            stage: Stage::Completed,
            stats: Some(stats),
            output_path: Some(tl_lang_dir),
            error: None,
        }
    }

    fn extract_archives(&self, game_dir: &Path) -> anyhow::Result<usize> {
        let archives: Vec<PathBuf> = WalkDir::new(game_dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().map(|x| x == "rpa").unwrap_or(false))
            .map(|e| e.path().to_path_buf())
            .collect();

        let mut extracted = 0;
        for path in archives {
            if self.stopped() {
                break;
            }
            let archive = RpaArchive::open(&path)?;
            self.events.log(
                LogLevel::Info,
                format!(
                    "{}: {} file(s)",
                    path.file_name().unwrap_or_default().to_string_lossy(),
                    archive.file_count()
                ),
            );
            extracted += archive.extract_all(game_dir, None)?.len();
        }
        Ok(extracted)
    }

    /// Engine-level translations extracted out of an archive would get the
    /// engine's own scripts translated and crash the game.
    fn cleanup_engine_tl(&self, game_dir: &Path) {
        let common = game_dir.join("tl").join("common");
        if common.is_dir() {
            let _ = std::fs::remove_dir_all(&common);
        }
    }

    fn source_entries(
        &self,
        game_dir: &Path,
        rpyc_mode: bool,
        diagnostics: &mut DiagnosticReport,
    ) -> Vec<ParsedText> {
        let rules = match &self.config.translation.never_translate_rules_path {
            Some(path) if path.exists() => match NeverTranslateRules::load(path) {
                Ok(rules) => rules,
                Err(e) => {
                    self.events
                        .log(LogLevel::Warning, format!("Rules file ignored: {e}"));
                    NeverTranslateRules::default()
                }
            },
            _ => NeverTranslateRules::default(),
        };
        let parser = RenpyParser::with_rules(rules);

        let mut entries = parser.parse_directory(game_dir, SOURCE_EXCLUDES);

        if rpyc_mode || self.config.translation.scan_rpymc_files {
            let mut extensions = vec![];
            if rpyc_mode {
                extensions.push("rpyc");
            }
            if self.config.translation.scan_rpymc_files {
                extensions.push("rpymc");
            }
            for path in files_with_ext(game_dir, &extensions) {
                if is_under_excluded(&path, game_dir) {
                    continue;
                }
                match rpyc::extract_file(&path) {
                    Ok(harvested) => {
                        for item in harvested {
                            entries.push(ParsedText {
                                text: item.text,
                                entry_type: match item.entry_type {
                                    "dialogue" => EntryType::Dialogue,
                                    "menu" => EntryType::Menu,
                                    _ => EntryType::Ui,
                                },
                                file_path: path.clone(),
                                line_number: item.line,
                                character: item.character,
                                context_line: item.context_path.join("/"),
                                label: item.context_path.first().cloned(),
                            });
                        }
                    }
                    Err(e) => {
                        self.events.log(
                            LogLevel::Warning,
                            format!("Skipping {}: {e}", path.display()),
                        );
                        diagnostics.mark_skipped(&path, "rpyc_decode_failed", &e.to_string());
                    }
                }
            }
        }

        // Per-type filters from configuration.
        let before = entries.len();
        entries.retain(|e| self.config.type_enabled(e.entry_type));
        if before != entries.len() {
            self.events.log(
                LogLevel::Info,
                format!("Type filters dropped {} entr(ies)", before - entries.len()),
            );
        }
        entries
    }

    fn generate_stubs(
        &self,
        game_dir: &Path,
        tl_lang_dir: &Path,
        rpyc_mode: bool,
        diagnostics: &mut DiagnosticReport,
    ) -> anyhow::Result<()> {
        let entries = self.source_entries(game_dir, rpyc_mode, diagnostics);
        if entries.is_empty() {
            anyhow::bail!("no translatable strings found in the project");
        }
        self.events.log(
            LogLevel::Info,
            format!("Extracted {} translatable strings", entries.len()),
        );

        let generator = StubGenerator::new(&self.target_language);
        let created = generator.write_stubs(tl_lang_dir, game_dir, &entries)?;
        self.events
            .log(LogLevel::Info, format!("Created {} stub file(s)", created.len()));
        Ok(())
    }

    /// Scan source files (and data files) for strings the stub generator
    /// missed and append them as an extra strings file.
    fn deep_scan(
        &self,
        game_dir: &Path,
        tl_lang_dir: &Path,
        existing_files: &[TranslationFile],
        tl_parser: &TlParser,
    ) -> Option<TranslationFile> {
        let known: HashSet<&str> = existing_files
            .iter()
            .flat_map(|f| f.entries.iter().map(|e| e.original_text.as_str()))
            .collect();

        let parser = RenpyParser::new();
        let mut missing: Vec<ParsedText> = parser
            .parse_directory(game_dir, SOURCE_EXCLUDES)
            .into_iter()
            .filter(|e| self.config.type_enabled(e.entry_type))
            .filter(|e| !known.contains(e.text.as_str()))
            .collect();

        let registry = ExtractorRegistry::new();
        for data_entry in registry.extract_directory(game_dir) {
            if !known.contains(data_entry.original.as_str()) {
                missing.push(ParsedText {
                    text: data_entry.original,
                    entry_type: EntryType::Ui,
                    file_path: data_entry.file,
                    line_number: 0,
                    character: None,
                    context_line: data_entry.key_path,
                    label: None,
                });
            }
        }

        let mut seen = HashSet::new();
        missing.retain(|e| seen.insert(e.text.clone()));
        if missing.is_empty() {
            return None;
        }
        self.events.log(
            LogLevel::Info,
            format!("Deep scan found {} additional strings", missing.len()),
        );

        let mut content = format!("translate {} strings:\n\n", self.target_language);
        for entry in &missing {
            content.push_str(&format!(
                "    # {}\n    old \"{}\"\n    new \"\"\n\n",
                entry.context_line,
                crate::utils::escape_renpy_string(&entry.text)
            ));
        }
        let path = tl_lang_dir.join("strings_deepscan.rpy");
        if let Err(e) = encoding::write_atomic(&path, &content) {
            self.events
                .log(LogLevel::Warning, format!("Deep scan write failed: {e}"));
            return None;
        }
        match tl_parser.parse_file(&path) {
            Ok(file) => Some(file),
            Err(e) => {
                self.events
                    .log(LogLevel::Warning, format!("Deep scan parse failed: {e}"));
                None
            }
        }
    }

    /// Protect, dispatch, restore. Returns `None` when cancelled.
    async fn translate_entries(
        &self,
        tl_files: &[TranslationFile],
        untranslated: &[(usize, usize)],
        diagnostics: &mut DiagnosticReport,
    ) -> Option<HashMap<String, String>> {
        let api_target = {
            let mapped = renpy_lang_to_api(&self.target_language);
            if mapped.is_empty() {
                self.target_language.clone()
            } else {
                mapped.to_string()
            }
        };

        // Placeholder protection is pure CPU work; fan it across the pool.
        use rayon::prelude::*;
        let (requests, maps): (Vec<TranslationRequest>, Vec<guard::PlaceholderMap>) = untranslated
            .par_iter()
            .map(|&(fi, ei)| {
                let entry = &tl_files[fi].entries[ei];
                let (protected, placeholder_map) =
                    guard::protect_renpy_syntax(&entry.original_text);
                let metadata = RequestMetadata {
                    file_path: Some(entry.file_path.clone()),
                    line_number: entry.line_number,
                    character: entry.character.clone(),
                    original_text: Some(entry.original_text.clone()),
                    placeholder_map: Some(placeholder_map.clone()),
                    translation_id: Some(entry.translation_id.clone()),
                    ..Default::default()
                };
                let request = TranslationRequest::new(
                    protected,
                    &self.source_language,
                    &api_target,
                    self.engine,
                )
                .with_metadata(metadata);
                (request, placeholder_map)
            })
            .unzip();

        let total = requests.len();
        let mut translations = HashMap::new();
        let mut done = 0usize;
        let mut failures = 0usize;

        let chunk_size = self.config.translation.max_batch_size.max(1);
        for (chunk_index, chunk) in requests.chunks(chunk_size).enumerate() {
            if self.stopped() {
                return None;
            }
            let results = self.manager.translate_batch(chunk).await;
            if self.stopped() {
                // In-flight work finished; its results are discarded.
                return None;
            }

            for (offset, result) in results.into_iter().enumerate() {
                let index = chunk_index * chunk_size + offset;
                let (fi, ei) = untranslated[index];
                let entry = &tl_files[fi].entries[ei];
                done += 1;

                if !result.success {
                    failures += 1;
                    if let Some(error) = &result.error {
                        diagnostics.mark_skipped(
                            &entry.file_path,
                            &format!("translate_failed:{}", error.kind),
                            &entry.original_text,
                        );
                    }
                    continue;
                }

                let restored = guard::restore_renpy_syntax(&result.translated_text, &maps[index]);
                for fragment in guard::validate_integrity(&restored.text, &maps[index]) {
                    let warning = format!(
                        "Missing fragment {fragment} in translation of '{}'",
                        crate::utils::truncate_display(&entry.original_text, 60)
                    );
                    self.events.log(LogLevel::Warning, warning.clone());
                    diagnostics.add_integrity_warning(warning);
                }

                diagnostics.add_translated(&entry.file_path, 1);
                translations.insert(entry.translation_id.clone(), restored.text);
            }

            self.events.progress(
                done,
                total,
                format!("{done}/{total} translated ({failures} failed)"),
            );
        }

        if failures > 0 {
            self.events.log(
                LogLevel::Warning,
                format!("{failures}/{total} entries failed to translate"),
            );
        }
        Some(translations)
    }

    /// Flat original → translated map consumed by the runtime hook's
    /// aggressive-substitution path. Corrupted pairs are dropped, first
    /// write wins on conflicting duplicates, and pipe-delimited variants
    /// are split into individual segment pairs so the engine's `vary()`
    /// output still matches.
    fn generate_strings_json(
        &self,
        tl_files: &[TranslationFile],
        lang_dir: &Path,
        extra: &HashMap<String, String>,
        diagnostics: &mut DiagnosticReport,
    ) -> usize {
        let mut mapping: Vec<(String, String)> = Vec::new();
        let mut index: HashSet<String> = HashSet::new();

        let mut consider = |original: &str, translated: &str,
                            mapping: &mut Vec<(String, String)>,
                            index: &mut HashSet<String>,
                            diagnostics: &mut DiagnosticReport| {
            let original = original.trim();
            let translated = translated.trim();
            if original.is_empty() || translated.is_empty() || original == translated {
                return;
            }
            if let Some(reason) = sanitize_reason(original, translated) {
                diagnostics.count_sanitized(reason);
                return;
            }
            if index.contains(original) {
                let conflicting = mapping
                    .iter()
                    .find(|(o, _)| o == original)
                    .map(|(_, t)| t != translated)
                    .unwrap_or(false);
                if conflicting {
                    diagnostics.count_sanitized("duplicate_key_conflict");
                }
                return;
            }
            index.insert(original.to_string());
            mapping.push((original.to_string(), translated.to_string()));
        };

        for file in tl_files {
            for entry in &file.entries {
                if entry.is_translated() {
                    consider(
                        &entry.original_text,
                        &entry.translated_text,
                        &mut mapping,
                        &mut index,
                        diagnostics,
                    );
                }
            }
        }
        for (original, translated) in extra {
            consider(original, translated, &mut mapping, &mut index, diagnostics);
        }

        // Pipe-delimited variant groups: the runtime picks one segment, so
        // each segment pair must be present on its own.
        let mut additions: Vec<(String, String)> = Vec::new();
        for (original, translated) in &mapping {
            if !original.contains('|') || !translated.contains('|') {
                continue;
            }
            let original_parts: Vec<&str> = original.split('|').collect();
            let translated_parts: Vec<&str> = translated.split('|').collect();
            if original_parts.len() != translated_parts.len()
                || !(2..=6).contains(&original_parts.len())
            {
                continue;
            }
            if original_parts
                .iter()
                .any(|part| part.chars().filter(|c| c.is_alphabetic()).count() < 2)
            {
                continue;
            }
            for (o, t) in original_parts.iter().zip(&translated_parts) {
                let (o, t) = (o.trim(), t.trim());
                if !o.is_empty() && !t.is_empty() && o != t && !index.contains(o) {
                    index.insert(o.to_string());
                    additions.push((o.to_string(), t.to_string()));
                }
            }
        }
        mapping.extend(additions);

        if mapping.is_empty() {
            return 0;
        }

        let object: serde_json::Map<String, serde_json::Value> = mapping
            .iter()
            .map(|(o, t)| (o.clone(), serde_json::Value::String(t.clone())))
            .collect();
        let count = object.len();
        let json = serde_json::Value::Object(object);
        let rendered = serde_json::to_string_pretty(&json).unwrap_or_default();
        if let Err(e) = encoding::write_atomic(lang_dir.join("strings.json"), &rendered) {
            self.events
                .log(LogLevel::Warning, format!("strings.json write failed: {e}"));
            return 0;
        }
        count
    }
}

static BRACKET_SET_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[[^\]]+\]").unwrap());
static TAG_SET_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{/?[^}]+\}").unwrap());

/// The seven corruption checks for strings.json candidates. Returns the
/// rejection reason, or `None` for a clean pair. (Duplicate-key conflicts
/// are detected by the caller, which owns the map.)
fn sanitize_reason(original: &str, translated: &str) -> Option<&'static str> {
    // 1. Batch separator bleeding into output.
    if ["|||", "RNLSEP", "SEP777", "TXTSEP"]
        .iter()
        .any(|sep| translated.contains(sep))
    {
        return Some("separator_remnant");
    }
    // 2. Unrestored protection tokens.
    if guard::has_residual_tokens(translated) || translated.contains('\u{27e6}') {
        return Some("placeholder_remnant");
    }
    // 3. HTML tags from HTML-protection translation modes.
    let lower = translated.to_lowercase();
    if lower.contains("<span") || lower.contains("</span>") || lower.contains("<div") {
        return Some("html_leakage");
    }
    // 4. Abnormal length inflation.
    if translated.len() > (original.len() * 4).max(original.len() + 80) {
        return Some("length_inflation");
    }
    // 5. The [placeholder] multiset must survive translation.
    let mut original_vars: Vec<&str> = BRACKET_SET_RE
        .find_iter(original)
        .map(|m| m.as_str())
        .collect();
    let mut translated_vars: Vec<&str> = BRACKET_SET_RE
        .find_iter(translated)
        .map(|m| m.as_str())
        .collect();
    original_vars.sort_unstable();
    translated_vars.sort_unstable();
    if original_vars != translated_vars {
        return Some("placeholder_set_mismatch");
    }
    // 6. Same for {text tags}.
    let mut original_tags: Vec<&str> =
        TAG_SET_RE.find_iter(original).map(|m| m.as_str()).collect();
    let mut translated_tags: Vec<&str> = TAG_SET_RE
        .find_iter(translated)
        .map(|m| m.as_str())
        .collect();
    original_tags.sort_unstable();
    translated_tags.sort_unstable();
    if original_tags != translated_tags {
        return Some("renpy_tag_set_mismatch");
    }
    None
}

/// Resolve whatever the user pointed at into the project root: the
/// directory that contains `game/`.
fn normalize_project_path(input: &Path) -> PathBuf {
    let mut candidate = if input.is_file() {
        input.parent().unwrap_or(Path::new(".")).to_path_buf()
    } else {
        input.to_path_buf()
    };

    if candidate
        .file_name()
        .map(|n| n.eq_ignore_ascii_case("game"))
        .unwrap_or(false)
    {
        if let Some(parent) = candidate.parent() {
            candidate = parent.to_path_buf();
        }
    } else if !candidate.join("game").is_dir() {
        if let Some(parent) = candidate.parent() {
            if parent.join("game").is_dir() {
                candidate = parent.to_path_buf();
            }
        }
    }
    candidate
}

fn has_files_with_ext(dir: &Path, extensions: &[&str]) -> bool {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .any(|e| {
            e.path()
                .extension()
                .and_then(|x| x.to_str())
                .map(|x| extensions.contains(&x))
                .unwrap_or(false)
        })
}

fn files_with_ext(dir: &Path, extensions: &[&str]) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|x| x.to_str())
                .map(|x| extensions.contains(&x))
                .unwrap_or(false)
        })
        .map(|e| e.path().to_path_buf())
        .collect()
}

fn is_under_excluded(path: &Path, game_dir: &Path) -> bool {
    let Ok(relative) = path.strip_prefix(game_dir) else {
        return false;
    };
    relative.components().any(|c| {
        c.as_os_str()
            .to_str()
            .map(|s| SOURCE_EXCLUDES.contains(&s))
            .unwrap_or(false)
    })
}

/// Spawn a consumer that renders pipeline events to the console the way
/// the CLI presents them.
pub fn spawn_console_renderer(
    mut receiver: tokio::sync::mpsc::UnboundedReceiver<PipelineEvent>,
) -> tokio::task::JoinHandle<()> {
    use colored::Colorize;
    tokio::spawn(async move {
        while let Some(event) = receiver.recv().await {
            match event {
                PipelineEvent::StageChanged { stage, message } => {
                    println!("{}", format!("[{}] {}", stage.as_str().to_uppercase(), message).cyan());
                }
                PipelineEvent::ProgressUpdated { current, total, text } => {
                    println!("  {current}/{total} {text}");
                }
                PipelineEvent::LogMessage { level, message } => match level {
                    LogLevel::Error => eprintln!("{}", format!("[ERROR] {message}").red()),
                    LogLevel::Warning => eprintln!("{}", format!("[WARN] {message}").yellow()),
                    _ => println!("  {message}"),
                },
                PipelineEvent::WarningRaised { title, message } => {
                    eprintln!("{}", format!("[WARN] {title}: {message}").yellow());
                }
                PipelineEvent::Finished(result) => {
                    if result.success {
                        println!("{}", format!("[OK] {}", result.message).green());
                    } else {
                        eprintln!("{}", format!("[FAILED] {}", result.message).red());
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizer_catches_known_corruptions() {
        assert_eq!(sanitize_reason("Hi", "A ||| B"), Some("separator_remnant"));
        assert_eq!(
            sanitize_reason("Hi", "merhaba xrpyxvar00"),
            Some("placeholder_remnant")
        );
        assert_eq!(
            sanitize_reason("Hi", "<span>merhaba</span>"),
            Some("html_leakage")
        );
        assert_eq!(
            sanitize_reason("Hi", &"x".repeat(200)),
            Some("length_inflation")
        );
        assert_eq!(
            sanitize_reason("Hi [name]", "Merhaba"),
            Some("placeholder_set_mismatch")
        );
        assert_eq!(
            sanitize_reason("Plain", "{font=x}Plain çeviri{/font}"),
            Some("renpy_tag_set_mismatch")
        );
        assert_eq!(sanitize_reason("Hi [name]", "Merhaba [name]"), None);
    }

    #[test]
    fn project_path_normalization() {
        let dir = tempfile::TempDir::new().unwrap();
        let root = dir.path().join("MyGame");
        std::fs::create_dir_all(root.join("game")).unwrap();

        assert_eq!(normalize_project_path(&root), root);
        assert_eq!(normalize_project_path(&root.join("game")), root);

        let exe = root.join("MyGame.exe");
        std::fs::write(&exe, "").unwrap();
        assert_eq!(normalize_project_path(&exe), root);
    }
}
