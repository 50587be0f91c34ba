//! Runtime hook generation.
//!
//! Two generated `.rpy` files force the target language at game init and
//! intercept untagged strings at display time. The `zzz_` prefix makes
//! Ren'Py load them after the game's own configuration; init priority
//! -100 runs before translations initialize and 1501 runs after every
//! normal init block.

use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};

use crate::encoding;

pub const RUNTIME_HOOK_FILENAME: &str = "zzz_renlocalizer_runtime.rpy";

const RUNTIME_HOOK_TEMPLATE: &str = r#"# Generated runtime translation hook. Do not edit; regenerated on every run.
# Forces the __LANG__ language and translates strings that were not tagged
# for translation at authoring time.

init -100 python:
    config.language = "__LANG__"

    def __rl_toggle_language():
        if _preferences.language == "__LANG__":
            renpy.change_language(None)
        else:
            renpy.change_language("__LANG__")

    config.keymap.setdefault("rl_toggle_language", []).append("shift_K_l")
    config.underlay.append(renpy.Keymap(rl_toggle_language=__rl_toggle_language))

init 1501 python:
    import os
    import json

    __rl_strings = {}
    try:
        __rl_path = os.path.join(config.gamedir, "tl", "__LANG__", "strings.json")
        if os.path.exists(__rl_path):
            with open(__rl_path, "r", encoding="utf-8") as __rl_file:
                __rl_strings = json.load(__rl_file)
    except Exception:
        __rl_strings = {}

    def __rl_lookup(text):
        if not text:
            return text

        # Layer 1: the engine's own translation tables.
        try:
            translated = renpy.translate_string(text, "__LANG__")
            if translated and translated != text:
                return translated
        except Exception:
            pass

        # Layer 2: the aggressive map built from every generated tl file.
        hit = __rl_strings.get(text)
        if hit:
            return hit

        # Dynamic say() calls wrap their text in quotes before display.
        stripped = text.strip('"')
        if stripped != text:
            hit = __rl_strings.get(stripped)
            if hit:
                return text.replace(stripped, hit)

        return text

    def __rl_say_menu_filter(text):
        return __rl_lookup(text)

    def __rl_replace_text(text):
        return __rl_lookup(text)

    # Pre-substitution path for say/menu strings, post-substitution path
    # for UI strings that never route through say.
    config.say_menu_text_filter = __rl_say_menu_filter
    config.replace_text = __rl_replace_text
"#;

const LANGUAGE_INIT_TEMPLATE: &str = r#"# Generated language activation file.
# gui.init() runs at init offset -2; setting config.language at init 0
# keeps screen state valid while still overriding the saved preference.

init python:
    config.language = "__LANG__"
"#;

/// Write the runtime hook into `game/`, replacing any prior version.
pub fn install_runtime_hook(game_dir: &Path, lang: &str) -> Result<PathBuf> {
    remove_stale_hooks(game_dir, RUNTIME_HOOK_FILENAME);

    let content = RUNTIME_HOOK_TEMPLATE.replace("__LANG__", lang);
    let path = game_dir.join(RUNTIME_HOOK_FILENAME);
    encoding::write_atomic(&path, &content)?;
    Ok(path)
}

pub fn remove_runtime_hook(game_dir: &Path) {
    remove_stale_hooks(game_dir, "");
}

/// Write `zzz_<lang>_language.rpy`, dropping activation files left over
/// from earlier runs with other languages.
pub fn install_language_init(game_dir: &Path, lang: &str) -> Result<PathBuf> {
    let filename = format!("zzz_{lang}_language.rpy");
    if let Ok(entries) = fs::read_dir(game_dir) {
        for entry in entries.filter_map(|e| e.ok()) {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with("zzz_") && name.ends_with("_language.rpy") && name != filename {
                let _ = fs::remove_file(entry.path());
                let _ = fs::remove_file(entry.path().with_extension("rpyc"));
            }
        }
    }

    let content = LANGUAGE_INIT_TEMPLATE.replace("__LANG__", lang);
    let path = game_dir.join(&filename);
    encoding::write_atomic(&path, &content)?;
    Ok(path)
}

fn remove_stale_hooks(game_dir: &Path, keep: &str) {
    let Ok(entries) = fs::read_dir(game_dir) else {
        return;
    };
    for entry in entries.filter_map(|e| e.ok()) {
        let name = entry.file_name().to_string_lossy().to_string();
        let is_hook = name.contains("_renlocalizer_") || name.contains("_renlocalize_");
        if is_hook && name.ends_with(".rpy") && name != keep {
            let _ = fs::remove_file(entry.path());
            let _ = fs::remove_file(entry.path().with_extension("rpyc"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn hook_names_language_and_filters() {
        let dir = TempDir::new().unwrap();
        let path = install_runtime_hook(dir.path(), "turkish").unwrap();
        assert_eq!(path.file_name().unwrap(), RUNTIME_HOOK_FILENAME);

        let content = encoding::read_text_lossy(&path).unwrap();
        assert!(content.contains("config.language = \"turkish\""));
        assert!(content.contains("init -100 python:"));
        assert!(content.contains("init 1501 python:"));
        assert!(content.contains("config.say_menu_text_filter"));
        assert!(content.contains("config.replace_text"));
        assert!(content.contains("renpy.translate_string"));
        assert!(content.contains("shift_K_l"));
        assert!(!content.contains("__LANG__"));
    }

    #[test]
    fn reinstall_replaces_previous_version() {
        let dir = TempDir::new().unwrap();
        let old = dir.path().join("zzz_renlocalizer_runtime_old.rpy");
        fs::write(&old, "# stale").unwrap();

        install_runtime_hook(dir.path(), "german").unwrap();
        assert!(!old.exists(), "stale hook removed");
        assert!(dir.path().join(RUNTIME_HOOK_FILENAME).exists());
    }

    #[test]
    fn language_init_cleans_other_languages() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("zzz_french_language.rpy"), "# old").unwrap();

        let path = install_language_init(dir.path(), "turkish").unwrap();
        assert!(path.ends_with("zzz_turkish_language.rpy"));
        assert!(!dir.path().join("zzz_french_language.rpy").exists());
    }
}
