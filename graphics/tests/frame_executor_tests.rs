//! Frame executor integration tests: pacing, recording, swapchain
//! recreation, telemetry and upload synchronization.

mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use glam::{Mat4, Vec3};
use rstest::rstest;

use common::{Fixture, LightingPass, SWAPCHAIN_IMAGES, ShadowPass, frame_data};
use lumen_graphics::backend::{DummyId, RecordedCommand, ScriptedOutcome};
use lumen_graphics::types::PipelineStages;
use lumen_graphics::{
    Extent2d, ExecutorConfig, FrameExecutor, GpuBackend, GraphicsError, ImageLayout, Light,
    LightKind, SlotState,
};

fn shadow_and_lighting(fixture: &Fixture, config: ExecutorConfig) -> FrameExecutor {
    let mut graph = fixture.graph();
    graph.add_pass(ShadowPass::new());
    graph.add_pass(LightingPass::new());
    FrameExecutor::new(graph, fixture.boxed_swapchain(), config).expect("executor")
}

// ============================================================================
// Construction
// ============================================================================

#[test]
fn test_executor_builds_graph_and_slots() {
    let fixture = Fixture::new();
    let executor = shadow_and_lighting(&fixture, ExecutorConfig::new().with_frames_in_flight(3));

    assert!(executor.graph().is_built());
    assert_eq!(executor.graph().execution_order().len(), 2);
    assert_eq!(executor.frames_in_flight(), 3);
    assert_eq!(executor.current_slot(), 0);
    assert!(executor.timestamps_enabled());
    for slot in 0..3 {
        assert_eq!(executor.slot_state(slot), Some(SlotState::Idle));
    }
    assert_eq!(executor.slot_state(3), None);

    // The shadow map's bring-up transition went out before the first frame.
    let bring_up = fixture.backend.last_submission().expect("bring-up submission");
    assert!(bring_up.fence.is_none());
    assert!(bring_up.commands.iter().any(|c| matches!(
        c,
        RecordedCommand::Barrier {
            old_layout: ImageLayout::Undefined,
            new_layout: ImageLayout::DepthStencilReadOnly,
            ..
        }
    )));
}

#[test]
fn test_zero_frames_in_flight_is_rejected() {
    let fixture = Fixture::new();
    let result = FrameExecutor::new(
        fixture.graph(),
        fixture.boxed_swapchain(),
        ExecutorConfig::new().with_frames_in_flight(0),
    );
    assert!(matches!(result, Err(GraphicsError::InvalidParameter(_))));
}

#[test]
fn test_timestamps_follow_device_support() {
    let fixture = Fixture::with_backend(lumen_graphics::DummyBackend::new().without_timestamps());
    let executor = shadow_and_lighting(&fixture, ExecutorConfig::new());
    assert!(!executor.timestamps_enabled());

    let fixture = Fixture::new();
    let executor = shadow_and_lighting(&fixture, ExecutorConfig::new().with_timestamps(false));
    assert!(!executor.timestamps_enabled());
}

// ============================================================================
// Recording
// ============================================================================

#[test]
fn test_shadow_then_lighting_frame() {
    let fixture = Fixture::new();
    let mut executor = shadow_and_lighting(&fixture, ExecutorConfig::new());
    fixture.backend.clear_history();

    executor.draw(&frame_data()).expect("frame");

    let submission = fixture.backend.last_submission().expect("frame submission");
    assert!(submission.fence.is_some());
    assert_eq!(submission.wait_semaphores.len(), 1);
    assert_eq!(submission.signal_semaphores.len(), 1);
    assert_eq!(submission.draw_count(), 2);

    let scopes: Vec<&RecordedCommand> = submission
        .commands
        .iter()
        .filter(|c| matches!(c, RecordedCommand::BeginRendering { .. }))
        .collect();
    assert_eq!(scopes.len(), 2);
    match scopes[0] {
        RecordedCommand::BeginRendering {
            color_images,
            depth_image,
            ..
        } => {
            assert!(color_images.is_empty());
            assert!(depth_image.is_some());
        }
        other => panic!("unexpected command {:?}", other),
    }
    match scopes[1] {
        RecordedCommand::BeginRendering {
            color_images, area, ..
        } => {
            assert_eq!(color_images.len(), 1);
            assert_eq!(area.extent(), common::SWAPCHAIN_EXTENT);
        }
        other => panic!("unexpected command {:?}", other),
    }

    // The shadow map goes into attachment layout and back for sampling.
    let layouts: Vec<(ImageLayout, ImageLayout)> = submission
        .commands
        .iter()
        .filter_map(|c| match c {
            RecordedCommand::Barrier {
                old_layout,
                new_layout,
                ..
            } => Some((*old_layout, *new_layout)),
            _ => None,
        })
        .collect();
    assert!(layouts.contains(&(
        ImageLayout::DepthStencilReadOnly,
        ImageLayout::DepthStencilAttachment
    )));
    assert!(layouts.contains(&(
        ImageLayout::DepthStencilAttachment,
        ImageLayout::DepthStencilReadOnly
    )));
    assert!(layouts.contains(&(ImageLayout::ColorAttachment, ImageLayout::PresentSrc)));

    let swapchain = &fixture.swapchain;
    assert_eq!(swapchain.presented(), vec![0]);
    assert_eq!(executor.frame_index(), 1);
    assert_eq!(executor.current_slot(), 1);
}

#[test]
fn test_frames_rotate_swapchain_images() {
    let fixture = Fixture::new();
    let mut executor = shadow_and_lighting(&fixture, ExecutorConfig::new());

    for _ in 0..SWAPCHAIN_IMAGES + 1 {
        executor.draw(&frame_data()).expect("frame");
    }

    assert_eq!(fixture.swapchain.presented(), vec![0, 1, 2, 0]);
    assert_eq!(executor.current_slot(), 0);
    // One pool reset per frame, plus the bring-up submission.
    assert!(fixture.backend.pool_reset_count() >= SWAPCHAIN_IMAGES as usize + 1);
}

#[test]
fn test_secondary_buffer_exhaustion_fails_the_frame() {
    let fixture = Fixture::new();
    let mut graph = fixture.graph();
    graph.add_pass(ShadowPass::new().with_cascades(3));
    graph.add_pass(LightingPass::new());
    let mut executor = FrameExecutor::new(
        graph,
        fixture.boxed_swapchain(),
        ExecutorConfig::new().with_secondary_buffers_per_frame(2),
    )
    .expect("executor");

    let result = executor.draw(&frame_data());
    assert!(matches!(
        result,
        Err(GraphicsError::ResourceExhausted {
            resource: "secondary command buffers",
            capacity: 2,
            ..
        })
    ));
}

#[rstest]
#[case::lights("lights")]
#[case::bones("bones")]
#[case::shadow_matrices("shadow matrices")]
fn test_per_frame_capacity_is_enforced(#[case] resource: &'static str) {
    let fixture = Fixture::new();
    let config = ExecutorConfig::new()
        .with_max_lights(1)
        .with_max_bones(1)
        .with_max_shadow_matrices(1);
    let mut executor = shadow_and_lighting(&fixture, config);

    let mut data = frame_data();
    match resource {
        "lights" => {
            let sun = Light::new(
                LightKind::Directional {
                    direction: Vec3::NEG_Y,
                },
                Vec3::ONE,
                1.0,
            );
            data.lights = vec![sun.clone(), sun];
        }
        "bones" => data.bones = vec![Mat4::IDENTITY; 2],
        _ => data.shadow_matrices = vec![Mat4::IDENTITY; 2],
    }

    let result = executor.draw(&data);
    assert_eq!(
        result,
        Err(GraphicsError::ResourceExhausted {
            resource,
            requested: 2,
            capacity: 1,
        })
    );
}

#[test]
fn test_failed_frame_replaces_acquire_semaphore() {
    let fixture = Fixture::new();
    let config = ExecutorConfig::new()
        .with_frames_in_flight(1)
        .with_max_bones(1);
    let mut executor = shadow_and_lighting(&fixture, config);

    executor.draw(&frame_data()).expect("frame 0");
    let first_acquire = fixture.backend.last_submission().expect("frame 0").wait_semaphores[0];

    // Fails after the image was acquired.
    let mut data = frame_data();
    data.bones = vec![Mat4::IDENTITY; 2];
    assert!(executor.draw(&data).is_err());
    assert_eq!(executor.slot_state(0), Some(SlotState::Idle));

    executor.draw(&frame_data()).expect("frame after failure");
    assert_eq!(executor.recreation_count(), 1);
    let acquire = fixture.backend.last_submission().expect("frame 1").wait_semaphores[0];
    assert_ne!(acquire, first_acquire);
    // The abandoned image was never presented; recreation restarts at image 0.
    assert_eq!(fixture.swapchain.presented(), vec![0, 0]);
}

// ============================================================================
// Frame pacing
// ============================================================================

#[test]
fn test_slot_reuse_waits_for_its_fence() {
    let fixture = Fixture::with_manual_fences();
    let mut executor =
        shadow_and_lighting(&fixture, ExecutorConfig::new().with_frames_in_flight(2));

    executor.draw(&frame_data()).expect("frame 0");
    executor.draw(&frame_data()).expect("frame 1");
    assert_eq!(fixture.backend.in_flight(), 2);
    assert!(fixture.backend.fence_waits().iter().all(|w| !w.blocked));

    let backend = Arc::clone(&fixture.backend);
    let gpu = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        backend.complete_oldest_submission()
    });
    executor.draw(&frame_data()).expect("frame 2");
    assert!(gpu.join().expect("gpu thread"));

    let wait = *fixture.backend.fence_waits().last().expect("fence wait");
    assert!(wait.blocked);
    assert!(wait.signaled);
    // Frame 1 and frame 2 are in flight.
    assert_eq!(fixture.backend.in_flight(), 2);
}

#[rstest]
#[case::one(1)]
#[case::two(2)]
#[case::three(3)]
fn test_cpu_runs_ahead_by_frames_in_flight(#[case] frames_in_flight: usize) {
    let fixture = Fixture::with_manual_fences();
    let mut executor = shadow_and_lighting(
        &fixture,
        ExecutorConfig::new().with_frames_in_flight(frames_in_flight),
    );

    for frame in 0..frames_in_flight {
        executor.draw(&frame_data()).expect("frame within budget");
        assert_eq!(fixture.backend.in_flight(), frame + 1);
    }
    assert!(fixture.backend.fence_waits().iter().all(|w| !w.blocked));

    let backend = Arc::clone(&fixture.backend);
    let gpu = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        backend.complete_oldest_submission()
    });
    executor.draw(&frame_data()).expect("frame over budget");
    assert!(gpu.join().expect("gpu thread"));

    let blocked: Vec<_> = fixture
        .backend
        .fence_waits()
        .into_iter()
        .filter(|w| w.blocked)
        .collect();
    assert_eq!(blocked.len(), 1);
    assert!(blocked[0].signaled);
    assert_eq!(executor.current_slot(), 1 % frames_in_flight);
}

#[test]
fn test_wait_idle_drains_in_flight_frames() {
    let fixture = Fixture::with_manual_fences();
    let mut executor = shadow_and_lighting(&fixture, ExecutorConfig::new());

    executor.draw(&frame_data()).expect("frame");
    assert_eq!(fixture.backend.in_flight(), 1);
    executor.wait_idle().expect("idle");
    assert_eq!(fixture.backend.in_flight(), 0);
}

// ============================================================================
// Swapchain recreation
// ============================================================================

#[test]
fn test_out_of_date_acquire_recreates_and_retries() {
    let fixture = Fixture::new();
    let mut executor = shadow_and_lighting(&fixture, ExecutorConfig::new());

    fixture.swapchain.resize(Extent2d::new(800, 600));
    executor.draw(&frame_data()).expect("frame after resize");

    assert_eq!(executor.recreation_count(), 1);
    assert_eq!(fixture.swapchain.recreation_count(), 1);
    assert_eq!(executor.swapchain().extent(), Extent2d::new(800, 600));

    let submission = fixture.backend.last_submission().expect("frame submission");
    let lighting_area = submission
        .commands
        .iter()
        .filter_map(|c| match c {
            RecordedCommand::BeginRendering { area, .. } => Some(area.extent()),
            _ => None,
        })
        .last();
    assert_eq!(lighting_area, Some(Extent2d::new(800, 600)));
}

#[rstest]
#[case::within_budget(3, true)]
#[case::exhausted(4, false)]
fn test_out_of_date_retry_budget(#[case] failures: u32, #[case] succeeds: bool) {
    let fixture = Fixture::new();
    let mut executor =
        shadow_and_lighting(&fixture, ExecutorConfig::new().with_max_swapchain_retries(3));
    for _ in 0..failures {
        fixture.swapchain.script_acquire(ScriptedOutcome::OutOfDate);
    }

    let result = executor.draw(&frame_data());
    if succeeds {
        assert!(result.is_ok());
        assert_eq!(executor.recreation_count(), failures);
    } else {
        assert!(matches!(
            result,
            Err(GraphicsError::SwapchainRecreationExhausted(3))
        ));
    }
}

#[rstest]
#[case::suboptimal(ScriptedOutcome::Suboptimal)]
#[case::out_of_date(ScriptedOutcome::OutOfDate)]
fn test_present_status_defers_recreation(#[case] outcome: ScriptedOutcome) {
    let fixture = Fixture::new();
    let mut executor = shadow_and_lighting(&fixture, ExecutorConfig::new());
    fixture.swapchain.script_present(outcome);

    executor.draw(&frame_data()).expect("frame 0");
    assert_eq!(executor.recreation_count(), 0);
    executor.draw(&frame_data()).expect("frame 1");
    assert_eq!(executor.recreation_count(), 1);
}

#[test]
fn test_lost_surface_is_reported() {
    let fixture = Fixture::new();
    let mut executor = shadow_and_lighting(&fixture, ExecutorConfig::new());
    fixture.swapchain.script_acquire(ScriptedOutcome::Lost);

    assert!(matches!(
        executor.draw(&frame_data()),
        Err(GraphicsError::SurfaceLost)
    ));
}

#[test]
fn test_minimized_window_skips_frames() {
    let fixture = Fixture::new();
    let mut executor = shadow_and_lighting(&fixture, ExecutorConfig::new());
    executor.draw(&frame_data()).expect("frame 0");
    let submissions = fixture.backend.submissions().len();

    fixture.swapchain.resize(Extent2d::new(0, 0));
    executor.draw(&frame_data()).expect("minimized frame");
    executor.draw(&frame_data()).expect("still minimized");

    assert_eq!(fixture.backend.submissions().len(), submissions);
    assert_eq!(executor.frame_index(), 1);
    assert_eq!(executor.recreation_count(), 0);
    assert_eq!(fixture.swapchain.presented(), vec![0]);
    assert_eq!(executor.slot_state(executor.current_slot()), Some(SlotState::Idle));

    fixture.swapchain.resize(Extent2d::new(800, 600));
    executor.draw(&frame_data()).expect("restored frame");

    assert_eq!(executor.frame_index(), 2);
    assert!(executor.recreation_count() >= 1);
    assert_eq!(executor.swapchain().extent(), Extent2d::new(800, 600));
    assert_eq!(fixture.swapchain.presented().len(), 2);
}

#[test]
fn test_requested_recreation_runs_before_next_frame() {
    let fixture = Fixture::new();
    let mut executor = shadow_and_lighting(&fixture, ExecutorConfig::new());

    executor.request_swapchain_recreation();
    executor.draw(&frame_data()).expect("frame");
    assert_eq!(executor.recreation_count(), 1);
}

// ============================================================================
// Recompilation
// ============================================================================

#[test]
fn test_pass_added_after_build_joins_next_frame() {
    let fixture = Fixture::new();
    let mut graph = fixture.graph();
    graph.add_pass(ShadowPass::new());
    let mut executor =
        FrameExecutor::new(graph, fixture.boxed_swapchain(), ExecutorConfig::new())
            .expect("executor");
    executor.draw(&frame_data()).expect("shadow only");

    let lighting = LightingPass::new();
    let calls = lighting.calls.clone();
    executor.graph_mut().add_pass(lighting);
    executor.draw(&frame_data()).expect("shadow and lighting");

    assert_eq!(executor.graph().execution_order().len(), 2);
    assert_eq!(calls.setup(), 1);
    assert_eq!(calls.compile(), 1);
    assert_eq!(calls.record(), 1);
}

// ============================================================================
// Telemetry
// ============================================================================

#[test]
fn test_telemetry_lags_by_frames_in_flight() {
    let fixture = Fixture::new();
    let mut executor =
        shadow_and_lighting(&fixture, ExecutorConfig::new().with_frames_in_flight(2));

    executor.draw(&frame_data()).expect("frame 0");
    executor.draw(&frame_data()).expect("frame 1");
    assert!(executor.profiling_data().is_none());

    executor.draw(&frame_data()).expect("frame 2");
    let profile = executor.profiling_data().expect("telemetry of frame 0");
    assert_eq!(profile.frame_index, 0);
    assert_eq!(profile.passes.len(), 2);
    assert_eq!(profile.total_draw_calls, 2);
    assert!(profile.gpu_frame_ms.is_some());

    let shadow = profile.pass("shadow").expect("shadow telemetry");
    assert_eq!(shadow.executions, 1);
    assert_eq!(shadow.draw_calls, 1);
    assert!(shadow.gpu_ms.is_some_and(|ms| ms > 0.0));

    executor.draw(&frame_data()).expect("frame 3");
    assert_eq!(executor.profiling_data().map(|p| p.frame_index), Some(1));
}

#[test]
fn test_telemetry_without_timestamps_has_no_gpu_times() {
    let fixture = Fixture::with_backend(lumen_graphics::DummyBackend::new().without_timestamps());
    let mut executor =
        shadow_and_lighting(&fixture, ExecutorConfig::new().with_frames_in_flight(1));

    executor.draw(&frame_data()).expect("frame 0");
    executor.draw(&frame_data()).expect("frame 1");

    let profile = executor.profiling_data().expect("telemetry of frame 0");
    assert!(profile.gpu_frame_ms.is_none());
    assert!(profile.passes.iter().all(|p| p.gpu_ms.is_none()));
}

// ============================================================================
// Upload synchronization
// ============================================================================

#[test]
fn test_upload_semaphore_is_waited_once() {
    let fixture = Fixture::new();
    let mut executor = shadow_and_lighting(&fixture, ExecutorConfig::new());

    let upload = Arc::new(fixture.backend.create_semaphore().expect("semaphore"));
    let upload_id = upload.dummy_id();
    executor.add_upload_semaphore(Arc::clone(&upload), PipelineStages::VERTEX_INPUT);

    executor.draw(&frame_data()).expect("frame 0");
    let waits = fixture.backend.last_submission().expect("frame 0").wait_semaphores;
    assert_eq!(waits.len(), 2);
    assert!(waits.contains(&upload_id));
    // The slot holds the semaphore until its frame retires.
    assert!(Arc::strong_count(&upload) > 1);

    executor.draw(&frame_data()).expect("frame 1");
    let waits = fixture.backend.last_submission().expect("frame 1").wait_semaphores;
    assert_eq!(waits.len(), 1);
    assert!(!waits.contains(&upload_id));

    // Slot 0 is waited again on frame 2, which releases the semaphore.
    executor.draw(&frame_data()).expect("frame 2");
    assert_eq!(Arc::strong_count(&upload), 1);
}
