//! WGSL sources for the fluid passes, keyword preprocessing and binding
//! reflection.
//!
//! Sources carry `#ifdef KEYWORD` blocks. `with_keywords` prepends one
//! `#define` per keyword and backends call `preprocess` before handing the
//! text to their compiler, so a single source yields every variant.

mod program;

pub use program::{compile_shader, keywords_hash, Material, Program, ProgramSet};
pub(crate) use program::display_keywords;

use crate::error::ShaderError;

pub const U_TEXTURE: &str = "u_texture";
pub const U_TARGET: &str = "u_target";
pub const U_VELOCITY: &str = "u_velocity";
pub const U_SOURCE: &str = "u_source";
pub const U_CURL: &str = "u_curl";
pub const U_PRESSURE: &str = "u_pressure";
pub const U_DIVERGENCE: &str = "u_divergence";

/// Selects bilinear interpolation done in the shader instead of by the sampler.
pub const MANUAL_FILTERING: &str = "MANUAL_FILTERING";
/// Enables the surface-normal lighting term in the display pass.
pub const SHADING: &str = "SHADING";

const COMMON: &str = include_str!("common.wgsl");

/// Every shader the pipeline compiles.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ShaderKind {
    BaseVertex,
    Copy,
    Clear,
    Color,
    Splat,
    Advection,
    Divergence,
    Curl,
    Vorticity,
    Pressure,
    GradientSubtract,
    Display,
}

impl ShaderKind {
    pub const FRAGMENTS: [ShaderKind; 11] = [
        ShaderKind::Copy,
        ShaderKind::Clear,
        ShaderKind::Color,
        ShaderKind::Splat,
        ShaderKind::Advection,
        ShaderKind::Divergence,
        ShaderKind::Curl,
        ShaderKind::Vorticity,
        ShaderKind::Pressure,
        ShaderKind::GradientSubtract,
        ShaderKind::Display,
    ];

    fn body(self) -> &'static str {
        match self {
            ShaderKind::BaseVertex => include_str!("base.vert.wgsl"),
            ShaderKind::Copy => include_str!("copy.wgsl"),
            ShaderKind::Clear => include_str!("clear.wgsl"),
            ShaderKind::Color => include_str!("color.wgsl"),
            ShaderKind::Splat => include_str!("splat.wgsl"),
            ShaderKind::Advection => include_str!("advection.wgsl"),
            ShaderKind::Divergence => include_str!("divergence.wgsl"),
            ShaderKind::Curl => include_str!("curl.wgsl"),
            ShaderKind::Vorticity => include_str!("vorticity.wgsl"),
            ShaderKind::Pressure => include_str!("pressure.wgsl"),
            ShaderKind::GradientSubtract => include_str!("gradient_subtract.wgsl"),
            ShaderKind::Display => include_str!("display.wgsl"),
        }
    }

    /// Full module source: shared header followed by the pass body.
    pub fn source(self) -> String {
        format!("{}\n{}", COMMON, self.body())
    }

    pub fn entry_point(self) -> &'static str {
        match self {
            ShaderKind::BaseVertex => "vs_main",
            _ => "fs_main",
        }
    }
}

/// Prepends a `#define` line for each keyword.
pub fn with_keywords(source: &str, keywords: &[&str]) -> String {
    let mut out = String::with_capacity(source.len() + keywords.len() * 24);
    for keyword in keywords {
        out.push_str("#define ");
        out.push_str(keyword);
        out.push('\n');
    }
    out.push_str(source);
    out
}

/// Keywords introduced by `#define` lines anywhere in `source`.
pub fn defined_keywords(source: &str) -> Vec<String> {
    source
        .lines()
        .filter_map(|line| line.trim().strip_prefix("#define"))
        .filter_map(|rest| rest.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

/// Resolves `#define`, `#ifdef`, `#ifndef`, `#else` and `#endif`.
///
/// Directive lines are dropped from the output; lines inside inactive
/// branches are dropped too.
pub fn preprocess(source: &str) -> Result<String, ShaderError> {
    let mut defines: Vec<&str> = Vec::new();
    // (branch active, parent active, seen #else)
    let mut stack: Vec<(bool, bool, bool)> = Vec::new();
    let mut out = String::with_capacity(source.len());

    for (index, raw) in source.lines().enumerate() {
        let line_no = index + 1;
        let line = raw.trim();
        let active = stack.last().map_or(true, |&(a, _, _)| a);

        if !line.starts_with('#') {
            if active {
                out.push_str(raw);
                out.push('\n');
            }
            continue;
        }

        let mut parts = line.split_whitespace();
        let directive = parts.next().unwrap_or_default();
        let arg = parts.next();
        let error = |message: &str| ShaderError::Preprocess {
            line: line_no,
            message: message.to_string(),
        };

        match directive {
            "#define" => {
                let name = arg.ok_or_else(|| error("#define without a name"))?;
                if active && !defines.contains(&name) {
                    defines.push(name);
                }
            }
            "#ifdef" | "#ifndef" => {
                let name = arg.ok_or_else(|| error("conditional without a name"))?;
                let defined = defines.contains(&name);
                let taken = if directive == "#ifdef" { defined } else { !defined };
                stack.push((active && taken, active, false));
            }
            "#else" => {
                let top = stack.last_mut().ok_or_else(|| error("#else without #ifdef"))?;
                if top.2 {
                    return Err(error("duplicate #else"));
                }
                top.0 = top.1 && !top.0;
                top.2 = true;
            }
            "#endif" => {
                stack.pop().ok_or_else(|| error("#endif without #ifdef"))?;
            }
            other => return Err(error(&format!("unknown directive {}", other))),
        }
    }

    if !stack.is_empty() {
        return Err(ShaderError::Preprocess {
            line: source.lines().count(),
            message: "unterminated #ifdef".to_string(),
        });
    }
    Ok(out)
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BindingKind {
    Uniform,
    Sampler,
    Texture,
}

/// One `@binding(N) var` declaration found in a shader module.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BindingInfo {
    pub name: String,
    pub binding: u32,
    pub kind: BindingKind,
}

/// Lists the resource bindings declared in preprocessed WGSL.
pub fn reflect_bindings(source: &str) -> Vec<BindingInfo> {
    let mut out = Vec::new();
    for line in source.lines() {
        let line = line.trim();
        if line.starts_with("//") {
            continue;
        }
        let Some(start) = line.find("@binding(") else {
            continue;
        };
        let rest = &line[start + "@binding(".len()..];
        let Some(end) = rest.find(')') else {
            continue;
        };
        let Ok(binding) = rest[..end].trim().parse::<u32>() else {
            continue;
        };
        let Some(var_at) = rest.find("var") else {
            continue;
        };
        let decl = &rest[var_at + 3..];
        let (qualifier, decl) = match decl.strip_prefix('<') {
            Some(q) => match q.find('>') {
                Some(close) => (&q[..close], &q[close + 1..]),
                None => continue,
            },
            None => ("", decl),
        };
        let Some((name, ty)) = decl.split_once(':') else {
            continue;
        };
        let name = name.trim();
        let ty = ty.trim();
        let kind = if qualifier.starts_with("uniform") {
            BindingKind::Uniform
        } else if ty.starts_with("sampler") {
            BindingKind::Sampler
        } else if ty.starts_with("texture") {
            BindingKind::Texture
        } else {
            continue;
        };
        out.push(BindingInfo {
            name: name.to_string(),
            binding,
            kind,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preprocess_selects_defined_branch() {
        let src = with_keywords("a\n#ifdef SHADING\nb\n#else\nc\n#endif\nd\n", &["SHADING"]);
        assert_eq!(preprocess(&src).unwrap(), "a\nb\nd\n");

        let src = with_keywords("a\n#ifdef SHADING\nb\n#else\nc\n#endif\nd\n", &[]);
        assert_eq!(preprocess(&src).unwrap(), "a\nc\nd\n");
    }

    #[test]
    fn test_preprocess_nested_and_ifndef() {
        let src = "#define A\n#ifdef A\n#ifndef B\nx\n#endif\n#ifdef B\ny\n#endif\n#endif\n";
        assert_eq!(preprocess(src).unwrap(), "x\n");
    }

    #[test]
    fn test_define_inside_inactive_branch_is_ignored() {
        let src = "#ifdef A\n#define B\n#endif\n#ifdef B\nx\n#endif\n";
        assert_eq!(preprocess(src).unwrap(), "");
    }

    #[test]
    fn test_preprocess_reports_malformed_directives() {
        assert!(matches!(
            preprocess("#endif\n"),
            Err(ShaderError::Preprocess { line: 1, .. })
        ));
        assert!(matches!(
            preprocess("#ifdef A\nx\n"),
            Err(ShaderError::Preprocess { .. })
        ));
        assert!(matches!(
            preprocess("#ifdef A\n#else\n#else\n#endif\n"),
            Err(ShaderError::Preprocess { line: 3, .. })
        ));
        assert!(matches!(
            preprocess("#pragma once\n"),
            Err(ShaderError::Preprocess { .. })
        ));
    }

    #[test]
    fn test_every_source_preprocesses() {
        for kind in ShaderKind::FRAGMENTS {
            for keywords in [&[][..], &[MANUAL_FILTERING, SHADING][..]] {
                let text = preprocess(&with_keywords(&kind.source(), keywords)).unwrap();
                assert!(!text.contains('#'), "{:?} kept a directive", kind);
                assert!(text.contains("fn fs_main"));
            }
        }
        let vertex = preprocess(&ShaderKind::BaseVertex.source()).unwrap();
        assert!(vertex.contains("fn vs_main"));
    }

    #[test]
    fn test_reflect_bindings() {
        let text = preprocess(&ShaderKind::Vorticity.source()).unwrap();
        let bindings = reflect_bindings(&text);
        let find = |name: &str| bindings.iter().find(|b| b.name == name).cloned();

        assert_eq!(find("params").map(|b| (b.binding, b.kind)), Some((0, BindingKind::Uniform)));
        assert_eq!(
            find("field_sampler").map(|b| (b.binding, b.kind)),
            Some((1, BindingKind::Sampler))
        );
        assert_eq!(find(U_VELOCITY).map(|b| (b.binding, b.kind)), Some((2, BindingKind::Texture)));
        assert_eq!(find(U_CURL).map(|b| (b.binding, b.kind)), Some((3, BindingKind::Texture)));
        assert_eq!(bindings.len(), 4);
    }

    #[test]
    fn test_defined_keywords() {
        let src = with_keywords("body", &[SHADING, MANUAL_FILTERING]);
        assert_eq!(defined_keywords(&src), vec![SHADING.to_string(), MANUAL_FILTERING.to_string()]);
    }
}
