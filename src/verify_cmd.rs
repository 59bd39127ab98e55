use std::path::PathBuf;

use serde::Serialize;

use crate::checker::{ContractChecker, ContractViolation};
use crate::config::Settings;
use crate::contract::{self, DiscoveredSuite};
use crate::executor::Executor;

// --- Types ---

#[derive(Debug, Serialize)]
pub struct CaseResult {
    pub name: String,
    pub passed: bool,
    pub failures: Vec<ContractViolation>,
    /// Set when the case could not be executed at all.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SuiteResult {
    pub suite: String,
    pub cases: Vec<CaseResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SuiteResult {
    fn failed_to_load(suite: &DiscoveredSuite, error: String) -> Self {
        Self {
            suite: suite.id.clone(),
            cases: vec![],
            error: Some(error),
        }
    }

    fn has_error(&self) -> bool {
        self.error.is_some() || self.cases.iter().any(|c| c.error.is_some())
    }
}

pub struct VerifyOptions<'a> {
    pub suite: Option<&'a str>,
    /// Only run cases whose name contains this text.
    pub case_filter: Option<&'a str>,
    pub group: Option<&'a str>,
    pub list: bool,
    pub json: bool,
}

// --- Suite execution ---

/// Run every case of `suite` once, in file order. Cases are independent: an
/// execution failure in one is recorded and the next still runs.
pub fn run_suite(
    suite: &DiscoveredSuite,
    checker: &ContractChecker<'_>,
    case_filter: Option<&str>,
) -> SuiteResult {
    let loaded = match suite.load() {
        Ok(s) => s,
        Err(e) => return SuiteResult::failed_to_load(suite, format!("{e:#}")),
    };
    let cases = match loaded.cases() {
        Ok(c) => c,
        Err(e) => return SuiteResult::failed_to_load(suite, e),
    };

    let results = cases
        .iter()
        .filter(|case| case_filter.is_none_or(|f| case.name().contains(f)))
        .map(|case| {
            let name = case.name();
            match case.run(checker) {
                Ok(failures) => {
                    let passed = failures.is_empty();
                    tracing::info!(suite = %suite.id, case = %name, passed, "case finished");
                    CaseResult {
                        name,
                        passed,
                        failures,
                        error: None,
                    }
                }
                Err(e) => {
                    tracing::info!(suite = %suite.id, case = %name, error = %e, "case errored");
                    CaseResult {
                        name,
                        passed: false,
                        failures: vec![],
                        error: Some(format!("{e:#}")),
                    }
                }
            }
        })
        .collect();

    SuiteResult {
        suite: suite.id.clone(),
        cases: results,
        error: None,
    }
}

// --- Output formatting ---

fn print_list(suites: &[DiscoveredSuite]) {
    for suite in suites {
        match suite.load().map_err(|e| e.to_string()).and_then(|s| s.cases()) {
            Ok(cases) => {
                let count = cases.len();
                let noun = if count == 1 { "case" } else { "cases" };
                println!("{} ({count} {noun})  {}", suite.id, suite.origin);
            }
            Err(_) => println!("{} (invalid)  {}", suite.id, suite.origin),
        }
    }
}

fn print_results(results: &[SuiteResult]) {
    let mut total_cases = 0;
    let mut total_passed = 0;

    for suite in results {
        if let Some(err) = &suite.error {
            println!("\u{2717} {} \u{2014} error: {err}", suite.suite);
            continue;
        }

        let suite_passed = suite.cases.iter().all(|c| c.passed);
        let icon = if suite_passed { "\u{2713}" } else { "\u{2717}" };
        println!("{icon} {}", suite.suite);

        for case in &suite.cases {
            total_cases += 1;
            if case.passed {
                total_passed += 1;
                println!("    \u{2713} {}", case.name);
                continue;
            }
            println!("    \u{2717} {}", case.name);
            if let Some(err) = &case.error {
                println!("        error: {err}");
            }
            for failure in &case.failures {
                for line in failure.to_string().lines() {
                    println!("        {line}");
                }
            }
        }
    }

    println!();
    println!("{total_passed}/{total_cases} passed");
}

fn print_json(results: &[SuiteResult]) {
    match serde_json::to_string_pretty(results) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("[certcheck] JSON serialization error: {e}"),
    }
}

// --- Entry point ---

pub fn cmd_verify(
    settings: &Settings,
    executor: &dyn Executor,
    search_dirs: &[PathBuf],
    opts: &VerifyOptions<'_>,
) -> i32 {
    // Exit codes: 0 = all pass, 1 = contract violation, 2 = config/execution error.
    let suites = contract::discover(search_dirs, opts.suite);

    if suites.is_empty() {
        if let Some(name) = opts.suite {
            eprintln!("[certcheck] no contract suite found: {name}");
            return 2;
        }
        eprintln!("[certcheck] no contract suites discovered");
        return 0;
    }

    if opts.list {
        print_list(&suites);
        return 0;
    }

    let group = opts.group.unwrap_or(&settings.inventory.default_group);
    let checker = ContractChecker::new(executor, settings, group);
    let results: Vec<SuiteResult> = suites
        .iter()
        .map(|s| run_suite(s, &checker, opts.case_filter))
        .collect();

    if let Some(filter) = opts.case_filter
        && results
            .iter()
            .all(|s| s.error.is_none() && s.cases.is_empty())
    {
        eprintln!("[certcheck] no case matches: {filter}");
        return 2;
    }

    let has_error = results.iter().any(SuiteResult::has_error);
    let has_failure = results.iter().any(|s| s.cases.iter().any(|c| !c.passed));

    if opts.json {
        print_json(&results);
    } else {
        print_results(&results);
    }

    if has_error {
        2
    } else {
        i32::from(has_failure)
    }
}
