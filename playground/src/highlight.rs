//! Syntax highlighting for emitted assembly and LLVM IR.
//!
//! Output is HTML-escaped text with classed `<span>` tokens. Every scope atom
//! becomes a class and the bundled syntaxes put the Pygments short class name
//! (`c1`, `nl`, `nf`, `na`, `nv`, `k`, `kt`, `s`, `m`) in each token scope,
//! which is what the web front end's stylesheet targets.

use syntect::html::{ClassStyle, ClassedHTMLGenerator};
use syntect::parsing::{SyntaxDefinition, SyntaxReference, SyntaxSet, SyntaxSetBuilder};
use syntect::util::LinesWithEndings;
use tracing::warn;

use crate::errors::Result;

const ASSEMBLY_SYNTAX: &str = include_str!("../syntaxes/assembly.sublime-syntax");
const LLVM_SYNTAX: &str = include_str!("../syntaxes/llvm.sublime-syntax");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Assembly,
    LlvmIr,
}

impl Language {
    fn syntax_name(self) -> &'static str {
        match self {
            Language::Assembly => "GNU Assembly",
            Language::LlvmIr => "LLVM IR",
        }
    }
}

/// Renders text for display. Must not fail; unknown input is passed through
/// escaped.
pub trait Highlighter: Send + Sync {
    fn highlight(&self, text: &str, language: Language) -> String;
}

#[derive(Debug)]
pub struct HtmlHighlighter {
    syntaxes: SyntaxSet,
}

impl HtmlHighlighter {
    pub fn new() -> Result<Self> {
        let mut builder = SyntaxSetBuilder::new();
        builder.add(SyntaxDefinition::load_from_str(ASSEMBLY_SYNTAX, true, None)?);
        builder.add(SyntaxDefinition::load_from_str(LLVM_SYNTAX, true, None)?);
        Ok(Self {
            syntaxes: builder.build(),
        })
    }

    fn render(
        &self,
        text: &str,
        syntax: &SyntaxReference,
    ) -> std::result::Result<String, syntect::Error> {
        let mut generator =
            ClassedHTMLGenerator::new_with_class_style(syntax, &self.syntaxes, ClassStyle::Spaced);
        for line in LinesWithEndings::from(text) {
            generator.parse_html_for_line_which_includes_newline(line)?;
        }
        Ok(generator.finalize())
    }
}

impl Highlighter for HtmlHighlighter {
    fn highlight(&self, text: &str, language: Language) -> String {
        let Some(syntax) = self.syntaxes.find_syntax_by_name(language.syntax_name()) else {
            return html_escape(text);
        };
        match self.render(text, syntax) {
            Ok(html) => html,
            Err(err) => {
                warn!(?language, error = %err, "highlighting failed; returning escaped text");
                html_escape(text)
            }
        }
    }
}

fn html_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
