//! Render graph integration tests: deduplication, ordering, recompilation
//! and swapchain resizes, driven through the dummy backend.

mod common;

use rstest::rstest;

use common::{
    ChainPass, Fixture, LightingPass, SHADOW_MAP_SIZE, SWAPCHAIN_EXTENT, SWAPCHAIN_IMAGES,
    ShadowPass, backbuffer_desc, color_desc, shadow_map_desc,
};
use lumen_graphics::graph::{ResourceDescriptor, ResourceKind, TextureSource};
use lumen_graphics::{
    DummySwapchain, Extent2d, GraphError, ResourceAccess, ResourceGraphBuilder, ResourceHandle,
    Swapchain,
};

fn swapchain_handle(graph: &lumen_graphics::RenderGraph) -> ResourceHandle {
    let builder = graph.builder();
    builder
        .handles()
        .iter()
        .copied()
        .find(|h| {
            builder
                .texture(*h)
                .is_some_and(|t| t.source == TextureSource::Swapchain)
        })
        .expect("graph declares a swapchain texture")
}

// ============================================================================
// Deduplication
// ============================================================================

#[test]
fn test_identical_descriptors_share_a_handle() {
    let mut builder = ResourceGraphBuilder::new();
    let written = builder.create_texture(shadow_map_desc(), ResourceAccess::Write);
    let read = builder.create_texture(shadow_map_desc(), ResourceAccess::Read);
    let other = builder.create_texture(color_desc("albedo"), ResourceAccess::Write);

    assert_eq!(written, read);
    assert_ne!(written, other);
    assert_eq!(builder.len(), 2);
    assert_eq!(builder.collision_count(), 0);
}

#[test]
fn test_shadow_and_lighting_share_the_shadow_map() {
    let fixture = Fixture::new();
    let mut graph = fixture.graph();
    graph.add_pass(ShadowPass::new());
    graph.add_pass(LightingPass::new());
    graph.build(&fixture.swapchain);

    // One shadow map and one swapchain target.
    assert_eq!(graph.builder().len(), 2);
    // The swapchain target compiles to one entry per image.
    assert_eq!(
        graph.store().count(ResourceKind::Texture),
        1 + SWAPCHAIN_IMAGES as usize
    );
    assert_eq!(
        fixture.backend.creation_counts().textures,
        1,
        "swapchain images are wrapped, not created"
    );

    let backbuffer = swapchain_handle(&graph);
    for image in 0..SWAPCHAIN_IMAGES {
        let texture = graph
            .store()
            .resolve_texture(backbuffer, image)
            .expect("swapchain image compiled");
        assert_eq!(texture.swapchain_index, Some(image));
        assert_eq!(texture.extent, SWAPCHAIN_EXTENT);
    }
}

#[rstest]
#[case::double_buffered(2)]
#[case::triple_buffered(3)]
#[case::quad_buffered(4)]
fn test_swapchain_target_has_one_entry_per_image(#[case] image_count: u32) {
    let fixture = Fixture::new();
    let swapchain = lumen_graphics::DummySwapchain::new(SWAPCHAIN_EXTENT, image_count);
    let mut graph = fixture.graph();
    graph.add_pass(ShadowPass::new());
    graph.add_pass(LightingPass::new());
    graph.build(&swapchain);

    assert_eq!(
        graph.store().count(ResourceKind::Texture),
        1 + image_count as usize
    );
    let backbuffer = swapchain_handle(&graph);
    assert!(graph.store().resolve_texture(backbuffer, image_count - 1).is_some());
    assert!(graph.store().resolve_texture(backbuffer, image_count).is_none());
}

// ============================================================================
// Ordering
// ============================================================================

#[test]
fn test_consumers_run_after_producers() {
    let fixture = Fixture::new();
    let mut graph = fixture.graph();
    // Authored in reverse.
    let lighting = graph.add_pass(LightingPass::new());
    let shadow = graph.add_pass(ShadowPass::new());
    graph.build(&fixture.swapchain);

    assert_eq!(graph.execution_order(), &[shadow, lighting]);
    assert!(graph.pass_graph().has_edge(shadow, lighting));
    assert_eq!(graph.pass_graph().edge_count(), 1);
}

/// Build a chain pass from `name:reads:writes`, lists comma-separated.
fn chain_pass(decl: &str) -> ChainPass {
    let mut parts = decl.split(':');
    let mut list = || -> Vec<&str> {
        parts
            .next()
            .unwrap_or_default()
            .split(',')
            .filter(|s| !s.is_empty())
            .collect()
    };
    let name = list();
    let reads = list();
    let writes = list();
    ChainPass::new(name[0], &reads, &writes)
}

#[rstest]
#[case::independent(&["a::x", "b::y", "c::z"], &[0, 1, 2])]
#[case::chain(&["a:y:z", "b:x:y", "c::x"], &[2, 1, 0])]
#[case::diamond(&["sink:l,r:out", "left:src:l", "right:src:r", "source::src"], &[3, 1, 2, 0])]
fn test_execution_order(#[case] passes: &[&str], #[case] expected: &[usize]) {
    let fixture = Fixture::new();
    let mut graph = fixture.graph();
    let ids: Vec<_> = passes
        .iter()
        .map(|decl| graph.add_pass(chain_pass(decl)))
        .collect();
    graph.build(&fixture.swapchain);

    let expected: Vec<_> = expected.iter().map(|i| ids[*i]).collect();
    assert_eq!(graph.execution_order(), expected.as_slice());
}

#[test]
fn test_cycle_at_build_leaves_order_empty() {
    let fixture = Fixture::new();
    let mut graph = fixture.graph();
    graph.add_pass(ChainPass::new("a", &["x"], &["y"]));
    graph.add_pass(ChainPass::new("b", &["y"], &["x"]));
    graph.build(&fixture.swapchain);

    assert!(graph.execution_order().is_empty());
    assert!(matches!(
        graph.sort(),
        Err(GraphError::CyclicDependency { remaining }) if remaining.len() == 2
    ));
}

#[test]
fn test_cycle_after_recompile_keeps_previous_order() {
    let fixture = Fixture::new();
    let mut graph = fixture.graph();
    let producer = ChainPass::new("a", &[], &["x"]);
    let decl = producer.decl.clone();
    let a = graph.add_pass(producer);
    let b = graph.add_pass(ChainPass::new("b", &["x"], &["y"]));
    graph.build(&fixture.swapchain);
    assert_eq!(graph.execution_order(), &[a, b]);

    decl.lock().reads.push(color_desc("y"));
    graph.pass_mut(a).expect("pass a").request_recompilation();
    let barriers = graph
        .recompile_dirty(&fixture.swapchain)
        .expect("recompile succeeds");

    assert!(barriers.is_some());
    assert_eq!(graph.execution_order(), &[a, b]);
    assert!(graph.sort().is_err());
    assert!(!graph.has_dirty_passes());
}

// ============================================================================
// Recompilation
// ============================================================================

#[test]
fn test_nothing_dirty_recompiles_nothing() {
    let fixture = Fixture::new();
    let mut graph = fixture.graph();
    graph.add_pass(ShadowPass::new());
    graph.build(&fixture.swapchain);
    let idle_calls = fixture.backend.wait_idle_count();

    let result = graph.recompile_dirty(&fixture.swapchain).expect("recompile");
    assert!(result.is_none());
    assert_eq!(fixture.backend.wait_idle_count(), idle_calls);
}

#[test]
fn test_dirty_producer_recompiles_transitive_consumers() {
    let fixture = Fixture::new();
    let mut graph = fixture.graph();
    let a = ChainPass::new("a", &[], &["x"]);
    let b = ChainPass::new("b", &["x"], &["y"]);
    let c = ChainPass::new("c", &["y"], &["z"]);
    let d = ChainPass::new("d", &[], &["w"]);
    let calls = [a.calls.clone(), b.calls.clone(), c.calls.clone(), d.calls.clone()];
    let a = graph.add_pass(a);
    graph.add_pass(b);
    graph.add_pass(c);
    graph.add_pass(d);
    graph.build(&fixture.swapchain);
    assert!(calls.iter().all(|c| c.compile() == 1));

    let idle_calls = fixture.backend.wait_idle_count();
    graph.pass_mut(a).expect("pass a").request_recompilation();
    graph.recompile_dirty(&fixture.swapchain).expect("recompile");

    let compiles: Vec<usize> = calls.iter().map(|c| c.compile()).collect();
    assert_eq!(compiles, vec![2, 2, 2, 1]);
    let setups: Vec<usize> = calls.iter().map(|c| c.setup()).collect();
    assert_eq!(setups, vec![2, 2, 2, 1]);
    assert!(fixture.backend.wait_idle_count() > idle_calls);
}

#[test]
fn test_dirty_consumer_recompiles_its_producer_only() {
    let fixture = Fixture::new();
    let mut graph = fixture.graph();
    let a = ChainPass::new("a", &[], &["x"]);
    let b = ChainPass::new("b", &["x"], &["y"]);
    let c = ChainPass::new("c", &["y"], &["z"]);
    let calls = [a.calls.clone(), b.calls.clone(), c.calls.clone()];
    graph.add_pass(a);
    graph.add_pass(b);
    let c = graph.add_pass(c);
    graph.build(&fixture.swapchain);

    graph.pass_mut(c).expect("pass c").request_recompilation();
    graph.recompile_dirty(&fixture.swapchain).expect("recompile");

    let compiles: Vec<usize> = calls.iter().map(|c| c.compile()).collect();
    assert_eq!(compiles, vec![1, 2, 2]);
}

#[test]
fn test_dirty_writer_recompiles_co_writers() {
    let fixture = Fixture::new();
    let mut graph = fixture.graph();
    let a = ChainPass::new("a", &[], &["x"]);
    let c = ChainPass::new("c", &[], &["x"]);
    let d = ChainPass::new("d", &[], &["w"]);
    let calls = [a.calls.clone(), c.calls.clone(), d.calls.clone()];
    let a = graph.add_pass(a);
    graph.add_pass(c);
    graph.add_pass(d);
    graph.build(&fixture.swapchain);

    let x = graph
        .builder()
        .handles()
        .iter()
        .copied()
        .find(|h| graph.builder().texture(*h).is_some_and(|t| t.name == "x"))
        .expect("x declared");
    let before = graph.store().texture(x).cloned().expect("x compiled");

    graph.pass_mut(a).expect("pass a").request_recompilation();
    graph.recompile_dirty(&fixture.swapchain).expect("recompile");

    let after = graph.store().texture(x).cloned().expect("x recompiled");
    assert!(!std::sync::Arc::ptr_eq(&before, &after));
    // `c` holds the replaced image too, so it compiles again; `d` does not.
    let compiles: Vec<usize> = calls.iter().map(|c| c.compile()).collect();
    assert_eq!(compiles, vec![2, 2, 1]);
}

#[test]
fn test_recompile_prunes_dropped_resources() {
    let fixture = Fixture::new();
    let mut graph = fixture.graph();
    let pass = ChainPass::new("a", &[], &["x", "scratch"]);
    let decl = pass.decl.clone();
    let a = graph.add_pass(pass);
    graph.build(&fixture.swapchain);
    assert_eq!(graph.store().count(ResourceKind::Texture), 2);

    decl.lock().writes.retain(|t| t.name != "scratch");
    graph.pass_mut(a).expect("pass a").request_recompilation();
    graph.recompile_dirty(&fixture.swapchain).expect("recompile");

    assert_eq!(graph.builder().len(), 1);
    assert_eq!(graph.store().count(ResourceKind::Texture), 1);
}

#[test]
fn test_extent_change_marks_pass_dirty() {
    let fixture = Fixture::new();
    let mut graph = fixture.graph();
    let shadow = graph.add_pass(ShadowPass::new());
    graph.build(&fixture.swapchain);

    let pass = graph.pass_mut(shadow).expect("shadow pass");
    pass.set_extent(Extent2d::new(512, 512));
    assert!(pass.is_dirty());
    pass.clear_dirty();
    pass.set_extent(Extent2d::new(512, 512));
    assert!(!pass.is_dirty());
}

// ============================================================================
// Swapchain resize
// ============================================================================

#[test]
fn test_resize_with_same_swapchain_is_idempotent() {
    let fixture = Fixture::new();
    let mut graph = fixture.graph();
    graph.add_pass(ShadowPass::new());
    graph.add_pass(LightingPass::new());
    graph.build(&fixture.swapchain);

    graph.on_swapchain_resize(&fixture.swapchain);
    let handles = graph.builder().handles().to_vec();
    let entries = graph.store().len();

    graph.on_swapchain_resize(&fixture.swapchain);
    assert_eq!(graph.builder().handles(), handles.as_slice());
    assert_eq!(graph.store().len(), entries);
}

#[test]
fn test_resize_rebuilds_swapchain_sized_resources() {
    let fixture = Fixture::new();
    let mut graph = fixture.graph();
    let shadow = ShadowPass::new();
    let lighting = LightingPass::new();
    let lighting_calls = lighting.calls.clone();
    graph.add_pass(shadow);
    graph.add_pass(lighting);
    graph.build(&fixture.swapchain);

    let mut swapchain = fixture.swapchain.clone();
    swapchain.resize(Extent2d::new(800, 600));
    graph.release_swapchain_resources();
    swapchain.recreate().expect("recreate");
    graph.on_swapchain_resize(&swapchain);

    let backbuffer = swapchain_handle(&graph);
    let texture = graph
        .store()
        .resolve_texture(backbuffer, 0)
        .expect("swapchain image compiled");
    assert_eq!(texture.extent, Extent2d::new(800, 600));

    let shadow_map = graph
        .builder()
        .handles()
        .iter()
        .copied()
        .find(|h| *h != backbuffer)
        .and_then(|h| graph.store().texture(h).cloned())
        .expect("shadow map compiled");
    assert_eq!(shadow_map.extent, Extent2d::new(SHADOW_MAP_SIZE, SHADOW_MAP_SIZE));
    assert_eq!(lighting_calls.compile(), 2);
}

#[test]
fn test_resize_adopts_swapchain_format() {
    let fixture = Fixture::new();
    let mut graph = fixture.graph();
    graph.add_pass(LightingPass::new());
    let swapchain = fixture
        .swapchain
        .clone()
        .with_format(lumen_graphics::TextureFormat::Rgba8UnormSrgb);
    graph.build(&swapchain);
    let before = swapchain_handle(&graph);

    graph.on_swapchain_resize(&swapchain);
    let after = swapchain_handle(&graph);

    // The handle survives even though the descriptor changed.
    assert_eq!(before, after);
    assert_eq!(
        graph.builder().texture(after).map(|t| t.format),
        Some(lumen_graphics::TextureFormat::Rgba8UnormSrgb)
    );
    assert_eq!(
        graph.builder().requested_descriptor(after),
        Some(&ResourceDescriptor::from(backbuffer_desc()))
    );
}

#[test]
fn test_resize_to_empty_swapchain_compiles_nothing() {
    let fixture = Fixture::new();
    let mut graph = fixture.graph();
    let lighting = LightingPass::new();
    let lighting_calls = lighting.calls.clone();
    graph.add_pass(ShadowPass::new());
    graph.add_pass(lighting);
    graph.build(&fixture.swapchain);
    let backbuffer = swapchain_handle(&graph);

    // A minimized window.
    let minimized = DummySwapchain::new(Extent2d::new(0, 0), SWAPCHAIN_IMAGES);
    graph.release_swapchain_resources();
    assert!(graph.on_swapchain_resize(&minimized).is_empty());
    assert!(graph.store().resolve_texture(backbuffer, 0).is_none());
    assert_eq!(lighting_calls.compile(), 1);

    // Restored.
    let restored = DummySwapchain::new(Extent2d::new(800, 600), SWAPCHAIN_IMAGES);
    graph.on_swapchain_resize(&restored);
    for index in 0..SWAPCHAIN_IMAGES {
        let texture = graph
            .store()
            .resolve_texture(backbuffer, index)
            .expect("swapchain image compiled");
        assert_eq!(texture.extent, Extent2d::new(800, 600));
    }
    assert_eq!(lighting_calls.compile(), 2);
}
