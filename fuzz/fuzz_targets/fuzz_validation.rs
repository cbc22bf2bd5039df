//! Fuzz testing for validation functions.
//!
//! Validators must never panic, whatever the input. They either accept it or
//! return `AppError::BadRequest`.
//!
//! # Running the Fuzz Tests
//!
//! ```bash
//! # Install cargo-fuzz (requires nightly)
//! cargo +nightly install cargo-fuzz
//!
//! # Run the validation fuzz target
//! cargo +nightly fuzz run fuzz_validation
//!
//! # Run with a time limit (e.g., 60 seconds)
//! cargo +nightly fuzz run fuzz_validation -- -max_total_time=60
//! ```

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use keygate::validation::{
    validate_contact,
    validate_event_name,
    validate_event_path,
    validate_key_name,
    validate_owner_id,
    validate_permission,
};

#[derive(Debug, Arbitrary)]
struct ContactInput<'a> {
    name: &'a str,
    email: &'a str,
    message: &'a str,
    company: Option<&'a str>,
}

fuzz_target!(|input: ContactInput<'_>| {
    let _ = validate_contact(input.name, input.email, input.message, input.company);

    for s in [input.name, input.email, input.message] {
        let _ = validate_key_name(s);
        let _ = validate_owner_id(s);
        let _ = validate_permission(s);
        let _ = validate_event_name(s);
        let _ = validate_event_path(s);
    }
});
