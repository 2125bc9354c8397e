//! Syntax highlighting backed by syntect's bundled grammars.

use slug::slugify;
use syntect::{
    html::{ClassStyle, ClassedHTMLGenerator},
    parsing::{SyntaxReference, SyntaxSet},
    util::LinesWithEndings,
};

use crate::application::repos::{RenderError, Renderer};

const PLAIN_TEXT_ALIASES: [&str; 4] = ["text", "plain", "plaintext", "txt"];

/// Emits class-annotated HTML; colours come from the page stylesheet.
pub struct SyntectRenderer {
    syntax_set: SyntaxSet,
    class_style: ClassStyle,
}

impl SyntectRenderer {
    pub fn new() -> Self {
        Self {
            syntax_set: SyntaxSet::load_defaults_newlines(),
            class_style: ClassStyle::SpacedPrefixed { prefix: "syntax-" },
        }
    }

    fn find_syntax(&self, token: &str) -> Option<&SyntaxReference> {
        let lowercase = token.trim().to_ascii_lowercase();
        if PLAIN_TEXT_ALIASES.contains(&lowercase.as_str()) {
            return Some(self.syntax_set.find_syntax_plain_text());
        }
        self.syntax_set
            .find_syntax_by_token(&lowercase)
            .or_else(|| self.syntax_set.find_syntax_by_name(token))
            .or_else(|| self.syntax_set.find_syntax_by_extension(&lowercase))
    }
}

/// CSS-safe language name, e.g. `plain-text`, `cpp`, `csharp`.
fn language_class(syntax: &SyntaxReference) -> String {
    slugify(syntax.name.replace('+', "p").replace('#', "sharp"))
}

impl Default for SyntectRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for SyntectRenderer {
    fn highlight(&self, content: &str, lexer_name: &str) -> Result<String, RenderError> {
        // Unknown lexers degrade to plain text rather than failing the read.
        let syntax = self
            .find_syntax(lexer_name)
            .unwrap_or_else(|| self.syntax_set.find_syntax_plain_text());

        let mut code = content.to_string();
        if !code.ends_with('\n') {
            code.push('\n');
        }

        let mut generator =
            ClassedHTMLGenerator::new_with_class_style(syntax, &self.syntax_set, self.class_style);
        for line in LinesWithEndings::from(code.as_str()) {
            generator
                .parse_html_for_line_which_includes_newline(line)
                .map_err(|err| RenderError::Highlighting {
                    language: lexer_name.to_string(),
                    message: err.to_string(),
                })?;
        }

        let highlighted = generator.finalize();
        let lang = language_class(syntax);
        Ok(format!(
            "<pre class=\"syntax-highlight syntax-lang-{lang}\" data-language=\"{lang}\">\
             <code class=\"language-{lang} syntax-code\">{highlighted}</code></pre>"
        ))
    }

    fn is_valid_lexer(&self, lexer_name: &str) -> bool {
        self.find_syntax(lexer_name).is_some()
    }

    fn lexer_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .syntax_set
            .syntaxes()
            .iter()
            .map(|syntax| syntax.name.clone())
            .collect();
        names.sort_unstable_by_key(|name| name.to_ascii_lowercase());
        names.dedup();
        names
    }
}
