// Stderr output that never panics.
//
// Crash callbacks run inside the panic hook. `eprintln!` panics when stderr
// is gone (detached console, closed pipe), and a panic inside the hook aborts
// the process before the previous hook gets to run. Write errors are dropped.

#[macro_export]
macro_rules! safe_eprintln {
    ($($arg:tt)*) => {{
        use std::io::Write;
        let _ = writeln!(std::io::stderr(), $($arg)*);
    }};
}
