//! Name demangling for the two symbol conventions relevant to Linux ELF
//! binaries: Rust and C++.

/// Returns a demangled form of `name` if any supported demangler
/// recognizes it, else `None`.
pub fn demangle_any(name: &str) -> Option<String> {
    if let Ok(rust) = rustc_demangle::try_demangle(name) {
        return Some(format!("{rust:#}"));
    }
    if let Ok(cpp) = cpp_demangle::Symbol::new(name) {
        if let Ok(demangled) = cpp.demangle(&cpp_demangle::DemangleOptions::new().no_return_type()) {
            return Some(demangled);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demangles_rust_symbol() {
        let mangled = "_ZN4core3fmt5Write9write_fmt17hbdd69d82a6f06e1dE";
        let demangled = demangle_any(mangled).unwrap();
        assert!(demangled.contains("core") && demangled.contains("fmt"));
    }

    #[test]
    fn demangles_cpp_symbol() {
        let mangled = "_ZN3foo3barEv";
        let demangled = demangle_any(mangled).unwrap();
        assert!(demangled.contains("foo::bar"));
    }

    #[test]
    fn leaves_unrecognized_name_alone() {
        assert!(demangle_any("plain_c_symbol").is_none());
    }
}
