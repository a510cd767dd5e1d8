//! Shader source synthesis.
//!
//! The program cache treats shader text as opaque: a
//! [`ShaderSourceProvider`] turns [`ProgramParameters`] into vertex and
//! fragment strings. [`TemplateShaderSource`] does this with `minijinja`
//! templates, one fragment template per built-in material kind plus a shared
//! vertex template. The bundled templates only declare interfaces (inputs,
//! uniforms and defines); shading code is supplied by the host through
//! [`TemplateShaderSource::register_template`].
//!
//! Template syntax matches the rest of the engine:
//! `{$ block $}`, `{{ variable }}` and `$$` line statements.

use std::collections::BTreeMap;

use minijinja::{Environment, syntax::SyntaxConfig};
use serde::Serialize;

use crate::errors::Result;
use crate::renderer::device::ProgramSource;
use crate::renderer::program::parameters::ProgramParameters;

pub trait ShaderSourceProvider {
    fn program_source(&self, params: &ProgramParameters) -> Result<ProgramSource>;
}

const DEFINES_CHUNK: &str = "\
{$ for name, value in defines|items $}
#define {{ name }} {{ value }}
{$ endfor $}
";

const VERTEX_TEMPLATE: &str = r"{$ include 'defines' $}
in vec3 position;
$$ if HAS_NORMAL
in vec3 normal;
$$ endif
$$ if HAS_UV
in vec2 uv;
$$ endif
$$ if HAS_TANGENT
in vec4 tangent;
$$ endif
$$ if USE_VERTEX_COLOR
in vec4 color;
$$ endif
$$ if USE_MORPH_TARGETS
$$ for i in range(MORPH_TARGET_COUNT|int)
in vec3 morphTarget{{ i }};
$$ if USE_MORPH_NORMALS
in vec3 morphNormal{{ i }};
$$ endif
$$ endfor
uniform float morphTargetInfluences[{{ MORPH_TARGET_COUNT }}];
$$ endif
$$ if USE_INSTANCING
in mat4 instanceMatrix;
$$ endif
uniform mat4 modelMatrix;
uniform mat4 viewMatrix;
uniform mat4 projectionMatrix;
uniform mat3 normalMatrix;
uniform vec3 cameraPosition;
$$ if kind == 'points'
uniform float size;
$$ endif
$$ if kind == 'sprite'
uniform float rotation;
$$ endif
void main() {}
";

const FRAGMENT_COMMON: &str = r"{$ include 'defines' $}
uniform vec4 diffuse;
uniform float opacity;
$$ if USE_ALPHA_TEST
uniform float alphaTest;
$$ endif
$$ if NUM_CLIPPING_PLANES|int > 0
uniform vec4 clippingPlanes[{{ NUM_CLIPPING_PLANES }}];
$$ endif
$$ if USE_MAP
uniform sampler2D map;
$$ endif
$$ if USE_ALPHA_MAP
uniform sampler2D alphaMap;
$$ endif
uniform float toneMappingExposure;
";

const LIGHTS_CHUNK: &str = r"uniform vec3 emissive;
uniform vec3 ambientLightColor;
$$ if NUM_DIR_LIGHTS|int > 0
uniform vec3 directionalLightColor[{{ NUM_DIR_LIGHTS }}];
uniform vec3 directionalLightDirection[{{ NUM_DIR_LIGHTS }}];
$$ endif
$$ if NUM_POINT_LIGHTS|int > 0
uniform vec3 pointLightColor[{{ NUM_POINT_LIGHTS }}];
uniform vec3 pointLightPosition[{{ NUM_POINT_LIGHTS }}];
uniform vec4 pointLightParams[{{ NUM_POINT_LIGHTS }}];
$$ endif
$$ if NUM_SPOT_LIGHTS|int > 0
uniform vec3 spotLightColor[{{ NUM_SPOT_LIGHTS }}];
uniform vec3 spotLightPosition[{{ NUM_SPOT_LIGHTS }}];
uniform vec3 spotLightDirection[{{ NUM_SPOT_LIGHTS }}];
uniform vec4 spotLightParams[{{ NUM_SPOT_LIGHTS }}];
$$ endif
$$ if NUM_HEMI_LIGHTS|int > 0
uniform vec3 hemisphereLightSkyColor[{{ NUM_HEMI_LIGHTS }}];
uniform vec3 hemisphereLightGroundColor[{{ NUM_HEMI_LIGHTS }}];
uniform vec3 hemisphereLightDirection[{{ NUM_HEMI_LIGHTS }}];
$$ endif
$$ if USE_EMISSIVE_MAP
uniform sampler2D emissiveMap;
$$ endif
$$ if USE_NORMAL_MAP
uniform sampler2D normalMap;
$$ endif
$$ if USE_AO_MAP
uniform sampler2D aoMap;
$$ endif
$$ if USE_ENV_MAP
uniform sampler2D envMap;
$$ endif
";

const PBR_CHUNK: &str = r"uniform float roughness;
uniform float metalness;
$$ if USE_ROUGHNESS_MAP
uniform sampler2D roughnessMap;
$$ endif
$$ if USE_METALNESS_MAP
uniform sampler2D metalnessMap;
$$ endif
";

/// `(template name, fragment body)` for each built-in kind.
const FRAGMENT_TEMPLATES: &[(&str, &str)] = &[
    ("mesh_basic", "{$ include 'fragment_common' $}\nvoid main() {}\n"),
    (
        "mesh_lambert",
        "{$ include 'fragment_common' $}\n{$ include 'lights' $}\nvoid main() {}\n",
    ),
    (
        "mesh_phong",
        "{$ include 'fragment_common' $}\n{$ include 'lights' $}\nuniform float shininess;\nuniform vec3 specular;\nvoid main() {}\n",
    ),
    (
        "mesh_standard",
        "{$ include 'fragment_common' $}\n{$ include 'lights' $}\n{$ include 'pbr' $}\nvoid main() {}\n",
    ),
    (
        "mesh_physical",
        "{$ include 'fragment_common' $}\n{$ include 'lights' $}\n{$ include 'pbr' $}\n$$ if USE_TRANSMISSION\nuniform float transmission;\nuniform float ior;\nuniform float thickness;\n$$ endif\nvoid main() {}\n",
    ),
    ("points", "{$ include 'fragment_common' $}\nvoid main() {}\n"),
    (
        "line_basic",
        "{$ include 'fragment_common' $}\nuniform float linewidth;\nvoid main() {}\n",
    ),
    ("sprite", "{$ include 'fragment_common' $}\nvoid main() {}\n"),
];

#[derive(Serialize)]
struct TemplateContext<'a> {
    #[serde(flatten)]
    flags: &'a BTreeMap<&'static str, &'static str>,
    defines: &'a BTreeMap<&'static str, &'static str>,
    kind: &'a str,
}

/// Template-backed source provider.
pub struct TemplateShaderSource {
    env: Environment<'static>,
}

impl std::fmt::Debug for TemplateShaderSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateShaderSource").finish_non_exhaustive()
    }
}

impl TemplateShaderSource {
    pub fn new() -> Result<Self> {
        let mut env = Environment::new();
        let syntax = SyntaxConfig::builder()
            .block_delimiters("{$", "$}")
            .variable_delimiters("{{", "}}")
            .line_statement_prefix("$$")
            .build()?;
        env.set_syntax(syntax);
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        env.set_undefined_behavior(minijinja::UndefinedBehavior::SemiStrict);

        env.add_template("defines", DEFINES_CHUNK)?;
        env.add_template("fragment_common", FRAGMENT_COMMON)?;
        env.add_template("lights", LIGHTS_CHUNK)?;
        env.add_template("pbr", PBR_CHUNK)?;
        env.add_template("vertex", VERTEX_TEMPLATE)?;
        for &(name, source) in FRAGMENT_TEMPLATES {
            env.add_template(name, source)?;
        }
        Ok(Self { env })
    }

    /// Replaces (or adds) a template. `vertex` is the shared vertex stage;
    /// kind names such as `mesh_standard` are fragment stages.
    pub fn register_template(&mut self, name: &str, source: &str) -> Result<()> {
        self.env
            .add_template_owned(name.to_string(), source.to_string())?;
        Ok(())
    }
}

impl ShaderSourceProvider for TemplateShaderSource {
    fn program_source(&self, params: &ProgramParameters) -> Result<ProgramSource> {
        let defines = params.defines().to_map();
        let kind = params.template.unwrap_or("custom");
        let ctx = TemplateContext {
            flags: &defines,
            defines: &defines,
            kind,
        };

        let (label, vertex, fragment) = match (&params.custom, params.template) {
            (Some(custom), _) => (
                custom.name.clone(),
                self.env.render_str(&custom.vertex, &ctx)?,
                self.env.render_str(&custom.fragment, &ctx)?,
            ),
            (None, Some(template)) => (
                template.to_string(),
                self.env.get_template("vertex")?.render(&ctx)?,
                self.env.get_template(template)?.render(&ctx)?,
            ),
            (None, None) => {
                return Err(minijinja::Error::new(
                    minijinja::ErrorKind::TemplateNotFound,
                    "program parameters name neither a template nor a custom shader",
                )
                .into());
            }
        };

        log::trace!("Synthesized program source '{label}'");
        Ok(ProgramSource {
            label,
            vertex,
            fragment,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::program::parameters::{LightCounts, ProgramFeatures};
    use crate::renderer::settings::{ColorSpace, ToneMapping};
    use crate::resources::material::VertexColors;
    use crate::resources::shader_defines::ShaderDefines;

    fn params(template: &'static str, features: ProgramFeatures) -> ProgramParameters {
        ProgramParameters {
            template: Some(template),
            kind_index: 0,
            features,
            vertex_colors: VertexColors::None,
            lights: LightCounts {
                directional: 2,
                ..LightCounts::default()
            },
            shadows: 0,
            clipping_planes: 0,
            morph_targets: 0,
            output_color_space: ColorSpace::Srgb,
            tone_mapping: ToneMapping::None,
            texture_units: 0,
            shader_id: 0,
            custom_defines: ShaderDefines::new(),
            custom: None,
        }
    }

    #[test]
    fn standard_template_declares_permutation_uniforms() {
        let source = TemplateShaderSource::new().unwrap();
        let src = source
            .program_source(&params("mesh_standard", ProgramFeatures::MAP | ProgramFeatures::HAS_NORMAL))
            .unwrap();

        assert!(src.fragment.contains("#define USE_MAP 1"));
        assert!(src.fragment.contains("uniform sampler2D map;"));
        assert!(src.fragment.contains("uniform vec3 directionalLightColor[2];"));
        assert!(src.fragment.contains("uniform float roughness;"));
        assert!(!src.fragment.contains("normalMap"));
        assert!(src.vertex.contains("in vec3 normal;"));
        assert!(!src.vertex.contains("in vec2 uv;"));
    }

    #[test]
    fn custom_shader_renders_its_own_text() {
        let source = TemplateShaderSource::new().unwrap();
        let mut p = params("mesh_basic", ProgramFeatures::empty());
        p.template = None;
        p.custom = Some(crate::renderer::program::parameters::CustomSource {
            name: "wave".into(),
            vertex: "uniform float time;\n{$ if USE_FOG $}uniform float fogDensity;{$ endif $}\n".into(),
            fragment: "uniform vec4 tint;\n".into(),
        });
        let src = source.program_source(&p).unwrap();
        assert_eq!(src.label, "wave");
        assert!(src.vertex.contains("uniform float time;"));
        assert!(!src.vertex.contains("fogDensity"));
    }

    #[test]
    fn misspelled_define_in_output_is_an_error() {
        let source = TemplateShaderSource::new().unwrap();
        let mut p = params("mesh_basic", ProgramFeatures::empty());
        p.template = None;
        p.custom = Some(crate::renderer::program::parameters::CustomSource {
            name: "typo".into(),
            vertex: "uniform vec3 lights[{{ NUM_DIR_LIGHT }}];\n".into(),
            fragment: String::new(),
        });

        let err = source.program_source(&p).unwrap_err();
        assert!(matches!(err, crate::errors::PrismError::ShaderTemplate(_)));
    }
}
