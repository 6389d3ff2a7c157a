use bevy::prelude::*;

pub(crate) const METABALL_AREAS_WGSL: &str =
    include_str!("../assets/shaders/metaball_areas.wgsl");

/// Adds the compositing program to `shaders`; every kernel is an entry point of it.
pub(crate) fn add_area_shader(shaders: &mut Assets<Shader>) -> Handle<Shader> {
    shaders.add(Shader::from_wgsl(
        METABALL_AREAS_WGSL,
        "embedded://metaball_areas/metaball_areas.wgsl",
    ))
}
