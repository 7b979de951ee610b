//! Stereo Geometry Shader Synthesis
//!
//! A vertex shader compiled with `geometryShader = 1` gets a companion
//! geometry shader that replays every triangle once per view, so a single
//! draw renders both eyes. The manager calls a [`GeometryShaderSynthesizer`]
//! at most once per vertex shader and caches the compiled result.
//!
//! ## Vertex shader contract
//!
//! - `gl_Position` is written in a space that `stereoViewProjections[view]`
//!   maps to clip space.
//! - Every user output is declared on its own line as
//!   `[layout(...)] [invariant] [flat|smooth|noperspective|centroid] out <type> <name>_vs;`
//!   (or `varying`). The geometry shader forwards `<name>_vs` to `<name>`,
//!   which is what the fragment shader reads, and repeats the layout and
//!   interpolation qualifiers on both sides. Output declarations outside this
//!   form fail synthesis instead of being dropped.
//!
//! The default [`StereoGeometrySynthesizer`] renders the embedded
//! `stereo_geometry.glsl` minijinja template.

use std::sync::OnceLock;

use kiln_core::{KilnError, Result, Shader};
use minijinja::syntax::SyntaxConfig;
use minijinja::{Environment, Error, ErrorKind};
use rust_embed::RustEmbed;
use serde::Serialize;

/// Name of the embedded geometry shader template.
pub const STEREO_TEMPLATE: &str = "stereo_geometry.glsl";

/// Suffix a vertex output must carry to be forwarded by the geometry shader.
pub const VERTEX_VARYING_SUFFIX: &str = "_vs";

const INTERPOLATION_QUALIFIERS: &[&str] = &["flat", "smooth", "noperspective", "centroid"];
const PRECISION_QUALIFIERS: &[&str] = &["highp", "mediump", "lowp"];
const STORAGE_QUALIFIERS: &[&str] = &["out", "varying"];

pub static STEREO_ENV: OnceLock<Environment<'static>> = OnceLock::new();

#[derive(RustEmbed)]
#[folder = "src/shaders"]
struct ShaderAssets;

pub fn get_env() -> &'static Environment<'static> {
    STEREO_ENV.get_or_init(|| {
        let mut env = Environment::new();

        let syntax = SyntaxConfig::builder()
            .block_delimiters("{$", "$}")
            .variable_delimiters("{{", "}}")
            .line_statement_prefix("$$")
            .build()
            .expect("Failed to configure Jinja2 syntax");

        env.set_syntax(syntax);
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        env.set_undefined_behavior(minijinja::UndefinedBehavior::Strict);

        env.set_loader(shader_loader);

        env
    })
}

fn shader_loader(name: &str) -> std::result::Result<Option<String>, Error> {
    let Some(file) = ShaderAssets::get(name) else {
        return Ok(None);
    };
    match std::str::from_utf8(file.data.as_ref()) {
        Ok(source) => Ok(Some(source.to_string())),
        Err(e) => Err(Error::new(
            ErrorKind::CannotDeserialize,
            format!("embedded shader {name} is not UTF-8: {e}"),
        )),
    }
}

/// Derives geometry shader source from a compiled vertex shader.
pub trait GeometryShaderSynthesizer: Send + Sync {
    /// Produce geometry shader source for `vertex`.
    fn synthesize(&self, vertex: &Shader) -> Result<String>;
}

/// A vertex output forwarded through the geometry shader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Varying {
    /// Qualifiers of the geometry input, each followed by a space, or empty.
    pub in_qualifiers: String,
    /// Qualifiers of the geometry output, each followed by a space, or empty.
    pub out_qualifiers: String,
    pub ty: String,
    /// Name as declared by the vertex shader.
    pub name: String,
    /// Name read by the fragment shader.
    pub output: String,
}

/// Split a leading `layout(...)` group off `decl`.
fn split_layout(decl: &str) -> Option<(&str, &str)> {
    let rest = decl.strip_prefix("layout")?;
    if !rest.trim_start().starts_with('(') {
        return None;
    }
    let close = rest.find(')')?;
    let split = "layout".len() + close + 1;
    Some((&decl[..split], &decl[split..]))
}

/// Scan vertex shader source for `out` / `varying` declarations.
///
/// Accepted form, one declaration per line:
/// `[layout(...)] [invariant] [flat|smooth|noperspective|centroid] out [precision] <type> <name>_vs;`
/// Any other output declaration is a [`KilnError::Synthesis`] error.
pub fn parse_varyings(source: &str, vertex_name: &str) -> Result<Vec<Varying>> {
    let synthesis_error = |message: String| KilnError::Synthesis {
        vertex: vertex_name.to_string(),
        message,
    };
    let mut varyings = Vec::new();

    for raw in source.lines() {
        let line = raw.split("//").next().unwrap_or_default().trim();
        let Some(decl) = line.strip_suffix(';') else {
            continue;
        };
        // interface blocks (`out gl_PerVertex { ... };`) are not forwarded
        if decl.contains('{') {
            continue;
        }

        let (layout, decl) = match split_layout(decl) {
            Some((layout, rest)) => (Some(layout), rest),
            None => (None, decl),
        };
        let words: Vec<&str> = decl.split_whitespace().collect();
        let Some(kw) = words.iter().position(|w| STORAGE_QUALIFIERS.contains(w)) else {
            continue;
        };
        // `f(in vec3 a, out vec3 b);` and other statements mentioning `out`
        if layout.is_none()
            && words[..kw]
                .iter()
                .any(|w| w.contains(['(', ')', ',', '=']) || !w.chars().all(char::is_alphanumeric))
        {
            continue;
        }

        let mut invariant = false;
        let mut interpolation = Vec::new();
        for word in &words[..kw] {
            match *word {
                "invariant" => invariant = true,
                w if INTERPOLATION_QUALIFIERS.contains(&w) => interpolation.push(w),
                other => {
                    return Err(synthesis_error(format!(
                        "unsupported qualifier {other} in output declaration: {line}"
                    )));
                }
            }
        }

        let mut rest = &words[kw + 1..];
        if rest.first().is_some_and(|w| PRECISION_QUALIFIERS.contains(w)) {
            rest = &rest[1..];
        }
        let [ty, name] = rest else {
            return Err(synthesis_error(format!(
                "unsupported output declaration: {line}"
            )));
        };
        if name.starts_with("gl_") {
            continue;
        }
        if name.contains('[') || name.contains(',') || ty.contains('[') {
            return Err(synthesis_error(format!(
                "array or multi-name output {name} cannot be forwarded"
            )));
        }
        let Some(output) = name.strip_suffix(VERTEX_VARYING_SUFFIX).filter(|o| !o.is_empty())
        else {
            return Err(synthesis_error(format!(
                "output {name} must end in {VERTEX_VARYING_SUFFIX}"
            )));
        };

        let mut in_qualifiers = String::new();
        if let Some(layout) = layout {
            in_qualifiers.push_str(layout.trim());
            in_qualifiers.push(' ');
        }
        let interpolation: String = interpolation.iter().map(|q| format!("{q} ")).collect();
        let out_qualifiers = format!(
            "{in_qualifiers}{}{interpolation}",
            if invariant { "invariant " } else { "" }
        );
        in_qualifiers.push_str(&interpolation);

        varyings.push(Varying {
            in_qualifiers,
            out_qualifiers,
            ty: (*ty).to_string(),
            name: (*name).to_string(),
            output: output.to_string(),
        });
    }

    Ok(varyings)
}

#[derive(Serialize)]
struct StereoContext<'a> {
    vertex_name: &'a str,
    view_count: u32,
    varyings: &'a [Varying],
}

/// Replicates each triangle across `view_count` viewports / layers.
#[derive(Debug, Clone, Copy)]
pub struct StereoGeometrySynthesizer {
    view_count: u32,
}

impl Default for StereoGeometrySynthesizer {
    fn default() -> Self {
        Self::new(2)
    }
}

impl StereoGeometrySynthesizer {
    #[must_use]
    pub fn new(view_count: u32) -> Self {
        Self {
            view_count: view_count.max(1),
        }
    }

    #[must_use]
    pub fn view_count(&self) -> u32 {
        self.view_count
    }

    /// Render the geometry shader for a vertex shader's source.
    pub fn generate(&self, vertex_name: &str, vertex_source: &str) -> Result<String> {
        let varyings = parse_varyings(vertex_source, vertex_name)?;
        let synthesis_error = |e: Error| KilnError::Synthesis {
            vertex: vertex_name.to_string(),
            message: e.to_string(),
        };

        let template = get_env()
            .get_template(STEREO_TEMPLATE)
            .map_err(synthesis_error)?;
        template
            .render(StereoContext {
                vertex_name,
                view_count: self.view_count,
                varyings: &varyings,
            })
            .map_err(synthesis_error)
    }
}

impl GeometryShaderSynthesizer for StereoGeometrySynthesizer {
    fn synthesize(&self, vertex: &Shader) -> Result<String> {
        self.generate(vertex.name(), vertex.source())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VERTEX: &str = "\
#version 400 core
in vec3 aPosition;
out vec2 uv_vs;           // texture coordinates
flat out int material_vs;
out highp vec3 normal_vs;
out gl_PerVertex { vec4 gl_Position; };
uniform mat4 modelView;
void main() { gl_Position = modelView * vec4(aPosition, 1.0); }
";

    #[test]
    fn parses_user_outputs() {
        let varyings = parse_varyings(VERTEX, "v").unwrap();
        let names: Vec<_> = varyings.iter().map(|v| (v.name.as_str(), v.output.as_str())).collect();
        assert_eq!(
            names,
            [("uv_vs", "uv"), ("material_vs", "material"), ("normal_vs", "normal")]
        );
        assert_eq!(varyings[1].in_qualifiers, "flat ");
        assert_eq!(varyings[1].out_qualifiers, "flat ");
        assert_eq!(varyings[2].ty, "vec3");
    }

    #[test]
    fn rejects_unsuffixed_outputs() {
        let err = parse_varyings("out vec2 uv;\n", "v").unwrap_err();
        assert!(matches!(err, KilnError::Synthesis { ref message, .. } if message.contains("uv")));
    }

    #[test]
    fn rejects_array_outputs() {
        assert!(parse_varyings("out float weights_vs[4];\n", "v").is_err());
    }

    #[test]
    fn renders_forwarding_for_every_view() {
        let source = StereoGeometrySynthesizer::new(2).generate("water.vert#1", VERTEX).unwrap();

        assert!(source.starts_with("#version 400 core"));
        assert!(source.contains("invocations = 2"));
        assert!(source.contains("uniform mat4 stereoViewProjections[2];"));
        assert!(source.contains("in vec2 uv_vs[];"));
        assert!(source.contains("flat out int material;"));
        assert!(source.contains("uv = uv_vs[i];"));
        assert!(source.contains("water.vert#1"));
        assert!(!source.contains("$$"));
    }

    #[test]
    fn view_count_is_at_least_one() {
        assert_eq!(StereoGeometrySynthesizer::new(0).view_count(), 1);
    }

    #[test]
    fn forwards_layout_and_invariant_qualifiers() {
        let src = "layout(location = 0) out vec2 uv_vs;\nlayout (location=1) invariant flat out int id_vs;\n";
        let varyings = parse_varyings(src, "v").unwrap();

        assert_eq!(varyings.len(), 2);
        assert_eq!(varyings[0].in_qualifiers, "layout(location = 0) ");
        assert_eq!(varyings[0].output, "uv");
        assert_eq!(varyings[1].in_qualifiers, "layout (location=1) flat ");
        assert_eq!(varyings[1].out_qualifiers, "layout (location=1) invariant flat ");

        let source = StereoGeometrySynthesizer::new(2).generate("v", src).unwrap();
        assert!(source.contains("layout(location = 0) in vec2 uv_vs[];"));
        assert!(source.contains("layout(location = 0) out vec2 uv;"));
        assert!(source.contains("uv = uv_vs[i];"));
    }

    #[test]
    fn unknown_output_qualifier_is_an_error() {
        let err = parse_varyings("patch out vec2 uv_vs;\n", "v").unwrap_err();
        assert!(matches!(err, KilnError::Synthesis { ref message, .. } if message.contains("patch")));
    }

    #[test]
    fn function_parameters_are_not_outputs() {
        let src = "void split(in vec3 a, out vec3 b);\nout vec2 uv_vs;\n";
        let varyings = parse_varyings(src, "v").unwrap();
        assert_eq!(varyings.len(), 1);
    }
}
