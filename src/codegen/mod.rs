//! Native code generation: IR module in, assembly text out.

pub mod x86;

pub use x86::X86Emitter;

/// Target platform for symbol naming and section directives. The
/// instruction stream is identical everywhere.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Platform {
    Linux,
    MacOs,
    Windows,
}

impl Platform {
    /// The platform this compiler was built for.
    pub fn host() -> Self {
        if cfg!(target_os = "macos") {
            Platform::MacOs
        } else if cfg!(target_os = "windows") {
            Platform::Windows
        } else {
            Platform::Linux
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "linux" => Some(Platform::Linux),
            "macos" => Some(Platform::MacOs),
            "windows" => Some(Platform::Windows),
            _ => None,
        }
    }

    /// C symbols carry a leading underscore on Mach-O.
    pub fn symbol(&self, name: &str) -> String {
        match self {
            Platform::MacOs => format!("_{}", name),
            _ => name.to_string(),
        }
    }

    pub fn rodata_section(&self) -> &'static str {
        match self {
            Platform::Linux => ".section .rodata",
            Platform::MacOs => ".section __TEXT,__cstring,cstring_literals",
            Platform::Windows => ".section .rdata",
        }
    }

    /// ELF wants a `.type` directive for function symbols.
    pub fn uses_type_directive(&self) -> bool {
        matches!(self, Platform::Linux)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_naming() {
        assert_eq!(Platform::Linux.symbol("main"), "main");
        assert_eq!(Platform::MacOs.symbol("main"), "_main");
        assert_eq!(Platform::Windows.symbol("printf"), "printf");
    }

    #[test]
    fn test_from_name() {
        assert_eq!(Platform::from_name("linux"), Some(Platform::Linux));
        assert_eq!(Platform::from_name("macos"), Some(Platform::MacOs));
        assert_eq!(Platform::from_name("riscv"), None);
    }

    #[test]
    fn test_type_directive_is_elf_only() {
        assert!(Platform::Linux.uses_type_directive());
        assert!(!Platform::MacOs.uses_type_directive());
        assert!(!Platform::Windows.uses_type_directive());
    }
}
