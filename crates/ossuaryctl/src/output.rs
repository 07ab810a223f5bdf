//! Status-line output helpers.

use owo_colors::OwoColorize;

pub fn print_error(message: &str) {
    eprintln!("[ERROR] {}", message.red());
}

pub fn print_success(message: &str) {
    println!("[OK] {}", message.green());
}

pub fn print_warning(message: &str) {
    eprintln!("[WARN] {}", message.yellow());
}
