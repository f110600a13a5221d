//! Contract repository
//!
//! Loads stub files and answers lookups by function name and argument count.
//! A file with a load-time error contributes nothing; other files still load.
//! Across files, a later contract replaces earlier ones whose signatures
//! accept an overlapping set of argument counts.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::ast::{Case, Clause, ContractBody, Formula, Signature, Spanned};
use crate::config::LoaderConfig;
use crate::error::{Result, StubError, report_error};
use crate::lexer::tokenize;
use crate::parser::parse;
use crate::predicate::PredicateLibrary;
use crate::resolver::check_file;

/// Contract of one external function, immutable once loaded
#[derive(Debug, Clone)]
pub struct Contract {
    signature: Signature,
    clauses: Vec<Spanned<Clause>>,
    cases: Vec<Case>,
    file: String,
    library: Arc<PredicateLibrary>,
}

impl Contract {
    pub(crate) fn new(
        signature: Signature,
        body: ContractBody,
        file: String,
        library: Arc<PredicateLibrary>,
    ) -> Self {
        Self {
            signature,
            clauses: body.clauses,
            cases: body.cases,
            file,
            library,
        }
    }

    pub fn name(&self) -> &str {
        &self.signature.name.node
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Top-level clauses in source order
    pub fn clauses(&self) -> &[Spanned<Clause>] {
        &self.clauses
    }

    pub fn cases(&self) -> &[Case] {
        &self.cases
    }

    /// Stub file the contract was loaded from
    pub fn file(&self) -> &str {
        &self.file
    }

    /// Predicates visible to the contract
    pub fn library(&self) -> &PredicateLibrary {
        &self.library
    }

    pub(crate) fn library_arc(&self) -> &Arc<PredicateLibrary> {
        &self.library
    }

    pub fn requires(&self) -> impl Iterator<Item = &Formula> {
        self.clauses.iter().filter_map(|c| match &c.node {
            Clause::Requires(f) => Some(f),
            _ => None,
        })
    }

    pub fn unsound_notes(&self) -> impl Iterator<Item = &str> {
        self.clauses.iter().filter_map(|c| match &c.node {
            Clause::Unsound(note) => Some(note.as_str()),
            _ => None,
        })
    }
}

/// A stub file that failed to load
#[derive(Debug, Clone)]
pub struct LoadFailure {
    pub file: String,
    /// Text of the file, when it could be read
    pub source: Option<String>,
    pub error: StubError,
}

impl LoadFailure {
    /// 1-based line and column of the error, when both the text and a span are known
    pub fn line_col(&self) -> Option<(usize, usize)> {
        let source = self.source.as_deref()?;
        Some(self.error.span()?.line_col(source))
    }
}

/// Outcome of loading several stub files
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    /// Files that loaded, with the number of contracts each contributed
    pub loaded: Vec<(String, usize)>,
    pub failures: Vec<LoadFailure>,
}

impl LoadReport {
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn contracts(&self) -> usize {
        self.loaded.iter().map(|(_, n)| n).sum()
    }

    fn record(&mut self, file: &str, source: Option<&str>, result: Result<usize>) {
        match result {
            Ok(count) => self.loaded.push((file.to_string(), count)),
            Err(error) => {
                let failure = LoadFailure {
                    file: file.to_string(),
                    source: source.map(str::to_string),
                    error,
                };
                let location = failure.line_col();
                warn!(
                    file,
                    line = location.map(|(line, _)| line),
                    col = location.map(|(_, col)| col),
                    kind = failure.error.kind(),
                    error = %failure.error,
                    "stub file skipped"
                );
                self.failures.push(failure);
            }
        }
    }

    /// Print every failure with ariadne
    pub fn report(&self) -> std::io::Result<()> {
        for failure in &self.failures {
            let source = failure.source.as_deref().unwrap_or("");
            report_error(&failure.file, source, &failure.error)?;
        }
        Ok(())
    }
}

/// Loaded contracts, keyed by function name
#[derive(Debug, Clone, Default)]
pub struct Repository {
    config: LoaderConfig,
    contracts: HashMap<String, Vec<Contract>>,
    /// Global initializers, keyed by the global's name
    initializers: HashMap<String, Contract>,
}

impl Repository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: LoaderConfig) -> Self {
        Self {
            config,
            contracts: HashMap::new(),
            initializers: HashMap::new(),
        }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Load one stub file from text. Returns the number of contracts added;
    /// nothing is added when the file fails.
    pub fn load_source(&mut self, file: &str, source: &str) -> Result<usize> {
        let tokens = tokenize(source)?;
        let parsed = parse(file, source, tokens)?;
        let checked = check_file(file, parsed, &self.config)?;
        let count = checked.contracts.len();
        for contract in checked.contracts {
            self.insert(contract);
        }
        for init in checked.initializers {
            if let Some(previous) = self.initializers.get(init.name()) {
                warn!(
                    global = init.name(),
                    previous = previous.file(),
                    file = init.file(),
                    "initializer replaced by a later stub file"
                );
            }
            self.initializers.insert(init.name().to_string(), init);
        }
        debug!(file, contracts = count, globals = checked.globals.len(), "stub file loaded");
        Ok(count)
    }

    pub fn load_file(&mut self, path: &Path) -> Result<usize> {
        let source = std::fs::read_to_string(path).map_err(|e| {
            StubError::io_error(format!("failed to read {}: {e}", path.display()))
        })?;
        self.load_source(&path.display().to_string(), &source)
    }

    /// Load `(file name, text)` pairs in order, collecting per-file failures
    pub fn load_sources<I, F, S>(&mut self, sources: I) -> LoadReport
    where
        I: IntoIterator<Item = (F, S)>,
        F: AsRef<str>,
        S: AsRef<str>,
    {
        let mut report = LoadReport::default();
        for (file, source) in sources {
            let (file, source) = (file.as_ref(), source.as_ref());
            let result = self.load_source(file, source);
            report.record(file, Some(source), result);
        }
        self.finish(&report);
        report
    }

    /// Load files in order, collecting per-file failures
    pub fn load_files<I, P>(&mut self, paths: I) -> LoadReport
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut report = LoadReport::default();
        for path in paths {
            let path = path.as_ref();
            let file = path.display().to_string();
            match std::fs::read_to_string(path) {
                Ok(source) => {
                    let result = self.load_source(&file, &source);
                    report.record(&file, Some(&source), result);
                }
                Err(e) => {
                    let error = StubError::io_error(format!("failed to read {file}: {e}"));
                    report.record(&file, None, Err(error));
                }
            }
        }
        self.finish(&report);
        report
    }

    /// Load every file with the configured extension under `dir`, in name order
    pub fn load_dir(&mut self, dir: &Path) -> Result<LoadReport> {
        let entries = std::fs::read_dir(dir).map_err(|e| {
            StubError::io_error(format!("failed to read {}: {e}", dir.display()))
        })?;
        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.is_file()
                    && p.extension()
                        .is_some_and(|ext| ext == self.config.extension.as_str())
            })
            .collect();
        paths.sort();
        Ok(self.load_files(paths))
    }

    /// Contract accepting `argc` arguments
    pub fn lookup(&self, name: &str, argc: usize) -> Option<&Contract> {
        let overloads = self.contracts.get(name)?;
        overloads
            .iter()
            .filter(|c| c.signature.accepts(argc))
            .min_by_key(|c| c.signature.variadic)
    }

    pub fn overloads(&self, name: &str) -> &[Contract] {
        self.contracts.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Contract run at program start for the global `name`
    pub fn initializer(&self, name: &str) -> Option<&Contract> {
        self.initializers.get(name)
    }

    pub fn initializers(&self) -> impl Iterator<Item = &Contract> {
        self.initializers.values()
    }

    /// Number of loaded contracts
    pub fn len(&self) -> usize {
        self.contracts.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.contracts.values().all(Vec::is_empty)
    }

    pub fn contracts(&self) -> impl Iterator<Item = &Contract> {
        self.contracts.values().flatten()
    }

    fn finish(&self, report: &LoadReport) {
        info!(
            files = report.loaded.len(),
            failed = report.failures.len(),
            contracts = self.len(),
            "stub loading finished"
        );
    }

    fn insert(&mut self, contract: Contract) {
        let overloads = self.contracts.entry(contract.name().to_string()).or_default();
        overloads.retain(|existing| {
            let replaced = overlaps(&existing.signature, &contract.signature);
            if replaced {
                warn!(
                    function = contract.name(),
                    previous = existing.file(),
                    file = contract.file(),
                    "contract replaced by a later stub file"
                );
            }
            !replaced
        });
        overloads.push(contract);
    }
}

/// Some argument count is accepted by both signatures
fn overlaps(a: &Signature, b: &Signature) -> bool {
    let (m, n) = (a.params.len(), b.params.len());
    match (a.variadic, b.variadic) {
        (false, false) => m == n,
        (true, false) => n >= m,
        (false, true) => m >= n,
        (true, true) => true,
    }
}
