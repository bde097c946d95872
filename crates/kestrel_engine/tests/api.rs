//! Public API surface tests that run without a live GPU device

use kestrel_engine::render::frame::plan_draws;
use kestrel_engine::{
    EngineConfig, FramePacket, InstanceGroup, MeshData, ModelHandle, Submesh, Transform3, Vertex,
    MAX_FRAMES_IN_FLIGHT, MAX_MODEL_INSTANCES,
};
use nalgebra::Vector3;

fn triangle_mesh() -> MeshData {
    let vertex = |x: f32, y: f32| Vertex {
        position: [x, y, 0.0],
        normal: [0.0, 0.0, 1.0],
        color: [0.8, 0.8, 0.8],
        texture_coord: [0.0, 0.0],
    };
    MeshData {
        submeshes: vec![Submesh {
            color: [0.8, 0.8, 0.8],
            vertex_base: 0,
            vertex_count: 3,
            index_base: 0,
            index_count: 3,
        }],
        vertices: vec![vertex(0.0, 0.0), vertex(1.0, 0.0), vertex(0.0, 1.0)],
        indices: vec![0, 1, 2],
    }
}

#[test]
fn frame_pipeline_constants_are_fixed_at_startup() {
    assert_eq!(MAX_FRAMES_IN_FLIGHT, 2);
    assert_eq!(MAX_MODEL_INSTANCES, 128);
}

#[test]
fn a_packet_with_three_instances_plans_one_instanced_draw() {
    let mut packet = FramePacket::new(Transform3::new(
        Vector3::new(0.0, 0.0, -3.0),
        Vector3::zeros(),
    ));
    packet.groups.push(InstanceGroup {
        model: ModelHandle::default(),
        transforms: vec![
            Transform3::new(Vector3::new(-1.0, 0.0, 0.0), Vector3::zeros()),
            Transform3::new(Vector3::zeros(), Vector3::zeros()),
            Transform3::new(Vector3::new(1.0, 0.0, 0.0), Vector3::zeros()),
        ],
    });

    let plan = plan_draws(&packet.groups).unwrap();
    assert_eq!(plan.len(), 1);
    assert_eq!(plan[0].instance_count, 3);
}

#[test]
fn mesh_validation_is_reachable_from_the_public_surface() {
    assert!(triangle_mesh().validate().is_ok());

    let mut broken = triangle_mesh();
    broken.indices.push(7);
    assert!(broken.validate().is_err());
}

#[test]
fn configuration_round_trips_through_toml() {
    let config = EngineConfig::from_toml_str(
        "application_name = \"api test\"\nscreen_width = 320\nscreen_height = 240",
    )
    .unwrap();
    assert_eq!(config.application_name, "api test");
    assert_eq!((config.screen_width, config.screen_height), (320, 240));

    let rendered = toml::to_string(&config).unwrap();
    let reparsed = EngineConfig::from_toml_str(&rendered).unwrap();
    assert_eq!(reparsed.screen_width, 320);
}
