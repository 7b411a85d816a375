//! File-format-specific generation policy.

use std::path::Path;

/// Format family of a target file, derived from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Notebook,
    Python,
    Rust,
    Script,
    Other,
}

impl FileFormat {
    pub fn from_path(path: &str) -> Self {
        let ext = Path::new(path)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("ipynb") => Self::Notebook,
            Some("py") => Self::Python,
            Some("rs") => Self::Rust,
            Some("js" | "mjs" | "cjs" | "ts" | "tsx" | "jsx") => Self::Script,
            _ => Self::Other,
        }
    }

    pub fn is_notebook(self) -> bool {
        self == Self::Notebook
    }

    /// Extra instructions appended to the content-generation prompt.
    pub fn instructions(self) -> &'static str {
        match self {
            Self::Python => "When writing new functions, use numpy-style docstrings.",
            Self::Rust => "Document new public items with rustdoc `///` comments.",
            Self::Script => "Document new functions with JSDoc comments.",
            Self::Notebook => NOTEBOOK_INSTRUCTIONS,
            Self::Other => "",
        }
    }
}

const NOTEBOOK_INSTRUCTIONS: &str = "\
In the notebook file, write short code snippets in code cells and avoid long code blocks. \
Make sure everything is done step-by-step and we can inspect intermediate results. \
Add explanatory markdown cells in front of every code cell. \
The notebook has NO cell outputs! \
Make sure that there is code that saves results such as plots, images or dataframes, e.g. as .png or .csv files. \
Numpy images have to be converted to np.uint8 before saving as .png. \
Plots must be saved to disk before the cell ends or it is shown. \
The notebook must be executable from top to bottom without errors. \
Return the notebook in JSON format!";
