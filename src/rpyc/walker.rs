//! Iterative walker over rehydrated Ren'Py AST nodes.
//!
//! The unpickler yields a tree of inert fake objects; this walker visits
//! every node with an explicit stack (deeply nested screens overflow a
//! recursive visit), emits entries for the node kinds it recognizes, and
//! applies a heuristic filter to keep identifiers out of the result.

use std::collections::HashSet;
use std::rc::Rc;

use super::pickle::{FakeObject, NodeKind, Value};

#[derive(Debug, Clone)]
pub struct HarvestedText {
    pub text: String,
    pub line: usize,
    pub context_path: Vec<String>,
    pub entry_type: &'static str,
    pub character: Option<String>,
}

// Keyword properties on screen displayables whose values are user-visible.
const TEXT_KEYWORDS: &[&str] = &[
    "text", "label", "caption", "tooltip", "alt", "help", "hover_text",
    "selected_text", "prefix", "suffix", "default", "hint", "subtitle",
    "credits", "about", "version_name",
];

// Short UI words that pass the filter despite being lowercase.
const COMMON_UI_WORDS: &[&str] = &[
    "yes", "no", "back", "skip", "auto", "save", "load", "help", "on", "off",
];

/// Heuristic for strings harvested out of compiled nodes: snake_case and
/// all-lowercase single words are variable names; Title-Case, mixed case,
/// multi-word strings, and the small UI whitelist are prose.
pub fn is_harvestable(text: &str) -> bool {
    if text.len() < 2 {
        return false;
    }
    if text.starts_with("gui.")
        || text.starts_with("config.")
        || text.starts_with("persistent.")
        || text.starts_with("store.")
        || text.starts_with("SetVariable")
    {
        return false;
    }
    if !text.chars().any(|c| c.is_alphabetic()) {
        return false;
    }
    if !text.contains(' ') {
        let lower = text.to_lowercase();
        if COMMON_UI_WORDS.contains(&lower.as_str()) {
            return true;
        }
        if text.contains('_') {
            return false;
        }
        if text.chars().all(|c| !c.is_uppercase()) {
            return false;
        }
    }
    true
}

pub struct AstWalker {
    pub entries: Vec<HarvestedText>,
    visited: HashSet<usize>,
}

impl Default for AstWalker {
    fn default() -> Self {
        Self::new()
    }
}

impl AstWalker {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            visited: HashSet::new(),
        }
    }

    pub fn walk(&mut self, root: &Value) {
        let mut stack: Vec<(Value, Vec<String>)> = vec![(root.clone(), Vec::new())];

        while let Some((value, context)) = stack.pop() {
            match &value {
                Value::List(list) => {
                    if self.mark_visited(Rc::as_ptr(list) as usize) {
                        for item in list.borrow().iter().rev() {
                            stack.push((item.clone(), context.clone()));
                        }
                    }
                }
                Value::Tuple(items) => {
                    for item in items.iter().rev() {
                        stack.push((item.clone(), context.clone()));
                    }
                }
                Value::Dict(dict) => {
                    if self.mark_visited(Rc::as_ptr(dict) as usize) {
                        for (_, v) in dict.borrow().iter() {
                            stack.push((v.clone(), context.clone()));
                        }
                    }
                }
                Value::Object(obj) => {
                    if self.mark_visited(Rc::as_ptr(obj) as usize) {
                        self.visit_object(&obj.borrow(), &context, &mut stack);
                    }
                }
                _ => {}
            }
        }
    }

    fn mark_visited(&mut self, ptr: usize) -> bool {
        self.visited.insert(ptr)
    }

    fn visit_object(
        &mut self,
        obj: &FakeObject,
        context: &[String],
        stack: &mut Vec<(Value, Vec<String>)>,
    ) {
        let line = node_line(obj);

        match obj.class.kind {
            NodeKind::Say => {
                let character = obj
                    .attr("who")
                    .and_then(|v| v.string_value())
                    .filter(|w| !w.is_empty());
                if let Some(what) = obj.attr("what").and_then(|v| v.string_value()) {
                    if !what.trim().is_empty() {
                        self.emit(what, line, context, "dialogue", character);
                    }
                }
            }
            NodeKind::Menu => {
                // items: [(label, condition, block), ...]
                if let Some(Value::List(items)) = obj.attr("items") {
                    for item in items.borrow().iter() {
                        if let Value::Tuple(parts) = item {
                            if let Some(label) =
                                parts.first().and_then(|v| v.string_value())
                            {
                                if !label.trim().is_empty() {
                                    self.emit(label, line, context, "menu", None);
                                }
                            }
                            // Choice bodies hold further statements.
                            for part in parts.iter().skip(1).rev() {
                                stack.push((part.clone(), context.to_vec()));
                            }
                        }
                    }
                }
            }
            NodeKind::Label | NodeKind::Screen | NodeKind::SlScreen => {
                let mut inner = context.to_vec();
                if let Some(name) = obj.attr("name").and_then(|v| v.string_value()) {
                    inner.push(name);
                }
                self.push_children(obj, &inner, stack);
            }
            NodeKind::SlDisplayable => {
                self.visit_displayable(obj, context, line, stack);
            }
            NodeKind::TranslateString | NodeKind::Translate => {
                // Already-translated blocks carry nothing new to extract,
                // but translate blocks wrap original statements.
                self.push_children(obj, context, stack);
            }
            NodeKind::UserStatement => {
                // The raw statement line may embed quoted strings, but
                // decoding per-statement grammars is out of reach here;
                // descend into any parsed sub-block only.
                self.push_children(obj, context, stack);
            }
            NodeKind::Python | NodeKind::PyCode | NodeKind::PyExpr => {
                // Code bodies are never translatable.
            }
            _ => {
                self.push_children(obj, context, stack);
            }
        }
    }

    fn visit_displayable(
        &mut self,
        obj: &FakeObject,
        context: &[String],
        line: usize,
        stack: &mut Vec<(Value, Vec<String>)>,
    ) {
        // Positional arguments: `text "Hello"` stores the string first.
        if let Some(Value::List(positional)) = obj.attr("positional") {
            for arg in positional.borrow().iter() {
                if let Some(text) = arg.string_value() {
                    let unquoted = strip_expr_quotes(&text);
                    if is_harvestable(&unquoted) {
                        self.emit(unquoted, line, context, "ui", None);
                    }
                }
            }
        }

        // Keyword arguments: [(name, value), ...].
        if let Some(Value::List(keywords)) = obj.attr("keyword") {
            for kw in keywords.borrow().iter() {
                let Value::Tuple(pair) = kw else { continue };
                if pair.len() != 2 {
                    continue;
                }
                let Some(key) = pair[0].string_value() else {
                    continue;
                };
                if TEXT_KEYWORDS.contains(&key.as_str()) {
                    if let Some(text) = pair[1].string_value() {
                        let unquoted = strip_expr_quotes(&text);
                        if is_harvestable(&unquoted) {
                            let mut ctx = context.to_vec();
                            ctx.push(key.clone());
                            self.emit(unquoted, line, &ctx, "ui", None);
                        }
                    }
                } else if matches!(key.as_str(), "action" | "hovered" | "unhovered" | "changed") {
                    stack.push((pair[1].clone(), context.to_vec()));
                }
            }
        }

        self.push_children(obj, context, stack);
    }

    fn push_children(
        &mut self,
        obj: &FakeObject,
        context: &[String],
        stack: &mut Vec<(Value, Vec<String>)>,
    ) {
        for field in ["children", "block", "entries", "statements"] {
            if let Some(value) = obj.attr(field) {
                stack.push((value.clone(), context.to_vec()));
            }
        }
    }

    fn emit(
        &mut self,
        text: String,
        line: usize,
        context: &[String],
        entry_type: &'static str,
        character: Option<String>,
    ) {
        self.entries.push(HarvestedText {
            text,
            line,
            context_path: context.to_vec(),
            entry_type,
            character,
        });
    }
}

fn node_line(obj: &FakeObject) -> usize {
    if let Some(line) = obj.attr("linenumber").and_then(|v| v.as_int()) {
        return line.max(0) as usize;
    }
    // SL nodes carry location: (filename, line).
    if let Some(Value::Tuple(loc)) = obj.attr("location") {
        if let Some(line) = loc.get(1).and_then(|v| v.as_int()) {
            return line.max(0) as usize;
        }
    }
    0
}

/// Screen-language positional args arrive as expression source, so a text
/// literal is still wrapped in quotes.
fn strip_expr_quotes(text: &str) -> String {
    let trimmed = text.trim();
    if (trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2)
        || (trimmed.starts_with('\'') && trimmed.ends_with('\'') && trimmed.len() >= 2)
    {
        crate::utils::unquote(trimmed)
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpyc::pickle::{ClassRef, resolve_class};
    use std::cell::RefCell;

    fn object(module: &str, name: &str, attrs: Vec<(&str, Value)>) -> Value {
        Value::Object(Rc::new(RefCell::new(FakeObject {
            class: Rc::new(ClassRef {
                module: module.to_string(),
                name: name.to_string(),
                kind: resolve_class(module, name),
            }),
            args: Vec::new(),
            attrs: attrs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        })))
    }

    fn s(text: &str) -> Value {
        Value::Str(Rc::new(text.to_string()))
    }

    #[test]
    fn extracts_say_statements_with_context() {
        let say = object(
            "renpy.ast",
            "Say",
            vec![("who", s("e")), ("what", s("Hello, world.")), ("linenumber", Value::Int(12))],
        );
        let label = object(
            "renpy.ast",
            "Label",
            vec![
                ("name", s("start")),
                ("block", Value::List(Rc::new(RefCell::new(vec![say])))),
            ],
        );

        let mut walker = AstWalker::new();
        walker.walk(&label);

        assert_eq!(walker.entries.len(), 1);
        let entry = &walker.entries[0];
        assert_eq!(entry.text, "Hello, world.");
        assert_eq!(entry.line, 12);
        assert_eq!(entry.character.as_deref(), Some("e"));
        assert_eq!(entry.context_path, vec!["start".to_string()]);
        assert_eq!(entry.entry_type, "dialogue");
    }

    #[test]
    fn extracts_menu_items() {
        let items = Value::List(Rc::new(RefCell::new(vec![
            Value::Tuple(Rc::new(vec![s("Go left"), Value::None, Value::None])),
            Value::Tuple(Rc::new(vec![s("Go right"), Value::None, Value::None])),
        ])));
        let menu = object("renpy.ast", "Menu", vec![("items", items)]);

        let mut walker = AstWalker::new();
        walker.walk(&menu);

        let texts: Vec<&str> = walker.entries.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["Go left", "Go right"]);
    }

    #[test]
    fn displayable_keywords_are_filtered() {
        let keywords = Value::List(Rc::new(RefCell::new(vec![
            Value::Tuple(Rc::new(vec![s("text"), s("'Start Game'")])),
            Value::Tuple(Rc::new(vec![s("style"), s("'menu_button'")])),
            Value::Tuple(Rc::new(vec![s("tooltip"), s("'save_slot'")])),
        ])));
        let displayable = object("renpy.sl2.slast", "SLDisplayable", vec![("keyword", keywords)]);

        let mut walker = AstWalker::new();
        walker.walk(&displayable);

        let texts: Vec<&str> = walker.entries.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["Start Game"], "snake_case values are dropped");
    }

    #[test]
    fn gui_screen_keywords_are_harvested() {
        // about/credits/version_name carry prose on every game's GUI
        // screens.
        let keywords = Value::List(Rc::new(RefCell::new(vec![
            Value::Tuple(Rc::new(vec![s("version_name"), s("'Anniversary Edition'")])),
            Value::Tuple(Rc::new(vec![s("about"), s("'Made by two people'")])),
            Value::Tuple(Rc::new(vec![s("credits"), s("'Art: Someone'")])),
        ])));
        let displayable = object("renpy.sl2.slast", "SLDisplayable", vec![("keyword", keywords)]);

        let mut walker = AstWalker::new();
        walker.walk(&displayable);

        let texts: Vec<&str> = walker.entries.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(
            texts,
            vec!["Anniversary Edition", "Made by two people", "Art: Someone"]
        );
    }

    #[test]
    fn harvest_heuristics() {
        assert!(!is_harvestable("game_menu"));
        assert!(!is_harvestable("vbox"));
        assert!(is_harvestable("Start"));
        assert!(is_harvestable("New Game"));
        assert!(is_harvestable("yes"));
        assert!(is_harvestable("Back"));
        assert!(!is_harvestable("x1"));
        assert!(!is_harvestable("gui.text_size"));
        assert!(!is_harvestable("SetVariable('seen_intro', True)"));
    }

    #[test]
    fn cyclic_graphs_terminate() {
        let list = Rc::new(RefCell::new(Vec::new()));
        let value = Value::List(list.clone());
        list.borrow_mut().push(value.clone());

        let mut walker = AstWalker::new();
        walker.walk(&value);
        assert!(walker.entries.is_empty());
    }
}
