fn main() {
    if let Err(err) = compliance_dash::cli::run() {
        compliance_dash::ui::eprintln_error(&err);
        std::process::exit(compliance_dash::exit::exit_code(&err));
    }
}
