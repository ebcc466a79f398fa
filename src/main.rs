fn main() -> std::process::ExitCode {
    miniterm_lib::run()
}
