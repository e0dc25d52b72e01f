//! Prints the bcrypt hash used to seed the administrator account.

use bcrypt::{hash, DEFAULT_COST};
use std::env;

fn main() {
    let Some(password) = env::args().nth(1) else {
        eprintln!("Usage: cargo run --bin hash-password <PASSWORD>");
        eprintln!("Seeds the admin when ADMIN_USERNAME and ADMIN_EMAIL are also set.");
        std::process::exit(1);
    };

    if password.len() < 8 {
        eprintln!("Password must be at least 8 characters");
        std::process::exit(1);
    }

    match hash(&password, DEFAULT_COST) {
        Ok(hashed) => {
            println!("# blog-backend admin seed (bcrypt cost {DEFAULT_COST})");
            println!("ADMIN_HASH_PASSWORD={hashed}");
        }
        Err(e) => {
            eprintln!("Error hashing password: {e}");
            std::process::exit(1);
        }
    }
}
