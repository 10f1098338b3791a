/*!
# Centesimal Composition Analysis

A laboratory results engine for the proximate (centesimal) composition of
foods, built in Rust.

## Overview

This crate records the five classical proximate determinations of a food
sample (moisture, ash, crude protein, lipids, crude fiber), each measured
in triplicate, and derives from them the carbohydrate fraction and the
energy value. Every computation follows the bench conventions of a food
analysis laboratory: raw weighings and titration volumes go in, rounded
percentages come out, and the spread between replicates is reported next
to every mean.

## Architecture

The crate is layered from forms down to storage:

### Form Layer
- **Key Components**:
  - Triplicate Form - Raw text fields, one map per replicate
  - Completeness Checker - Names every still-missing field id
  - Field Parser - Accepts finite decimal numbers, rejects the rest

### Computation Layer
- **Core Components**:
  - Method Formulas - One percentage formula per determination
  - Triplicate Aggregator - Mean, standard deviation, coefficient of variation
  - Carbohydrate Deriver - Residual of the five mandatory fractions
  - Energy Calculator - Atwater factors (4, 4, 9 kcal/g)

### Persistence Layer
- SQLite storage, one row per (user, sample, method)
- Account registry with Argon2 password hashes and session tokens
- CSV, XLSX, JSON and plain-text report exports

## Key Features

- Five determination methods with their bench formulas
- Triplicate statistics with fixed two-decimal rounding
- Carbohydrate by difference, stored once per sample
- Energy value (VET) from protein, lipid and carbohydrate
- Per-user result isolation with an administrator listing
- Free-text lab notes
- Export to CSV, XLSX, JSON and a printable report

## Modules

- **method**: Determination methods, typed replicate measurements, formulas
- **stats**: Triplicate aggregation (mean, standard deviation, CV)
- **composition**: Carbohydrate by difference and energy value
- **validator**: Form completeness checking
- **engine**: Facade tying validation, computation and storage together
- **store**: SQLite persistence for users, analyses and notes
- **auth**: Account registration, login and session management
- **export**: CSV, XLSX, JSON and report rendering
- **error**: The crate-wide error type

## Design Highlights

- Explicit user context on every engine call, no ambient session state
- One rounding rule everywhere: two decimals, half away from zero
- Replicate values are rounded before aggregation, so stored numbers
  always re-derive from what users saw on screen
- Division guards instead of errors for placeholder weighings
- Upsert semantics: re-recording a determination replaces it and
  invalidates the derived carbohydrate row
*/

// Re-export all modules so they appear in the documentation
pub mod auth;
pub mod composition;
pub mod engine;
pub mod error;
pub mod export;
pub mod method;
pub mod stats;
pub mod store;
pub mod validator;

/// Re-export everything from these modules to make it easier to use
pub use auth::*;
pub use composition::*;
pub use engine::*;
pub use error::*;
pub use export::*;
pub use method::*;
pub use stats::*;
pub use store::*;
pub use validator::*;
