use glam::Vec3;

use merlin_renderer::config::ClusterConfig;
use merlin_renderer::jobs::JobPool;
use merlin_renderer::lights::{PointLightGpu, SpotLightGpu};
use merlin_renderer::renderer::clusters::{ClusterGrid, ClusterView};

fn view() -> ClusterView {
    ClusterView { proj_scale_x: 1.0, proj_scale_y: 1.0, near: 0.1, far: 100.0 }
}

fn grid(dims: [u32; 3]) -> (ClusterGrid, JobPool) {
    let config = ClusterConfig {
        grid_x: dims[0],
        grid_y: dims[1],
        grid_z: dims[2],
        max_lights_per_cell: 255,
    };
    (ClusterGrid::new(&config), JobPool::new(3).expect("pool"))
}

fn point(position: Vec3, radius: f32, range: f32) -> PointLightGpu {
    PointLightGpu {
        position_radius: [position.x, position.y, position.z, radius],
        radiance_range: [1.0, 1.0, 1.0, range],
    }
}

fn spot(position: Vec3, range: f32) -> SpotLightGpu {
    SpotLightGpu {
        position_radius: [position.x, position.y, position.z, 0.0],
        radiance_range: [1.0, 1.0, 1.0, range],
        direction: [0.0, 0.0, -1.0, 0.0],
        cone: [0.4, 0.8, 1.0, 0.0],
    }
}

#[test]
fn centered_light_covers_its_cell_and_immediate_bounds() {
    let (mut grid, jobs) = grid([8, 8, 8]);
    let view = view();
    // Light on the view axis in the middle of the depth range.
    let light = point(Vec3::new(0.0, 0.0, -40.0), 1.0, 5.0);
    grid.rebuild(&jobs, &view, &[light], &[]);

    let metrics = grid.metrics();
    assert!(metrics.light_assignments > 0);
    assert_eq!(metrics.point_lights, 1);

    // The cell containing the light center must hold its index.
    let depth = 40.0f32;
    let norm_z = (depth - view.near) / (view.far - view.near);
    let z = (norm_z * 8.0).floor() as u32;
    let center_cell = grid.cell(3, 3, z);
    let center_or_neighbor = center_cell.point_lights.contains(&0)
        || grid.cell(4, 4, z).point_lights.contains(&0)
        || grid.cell(4, 3, z).point_lights.contains(&0)
        || grid.cell(3, 4, z).point_lights.contains(&0);
    assert!(center_or_neighbor);
}

#[test]
fn tile_offsets_chain_exactly_over_point_and_spot_counts() {
    let (mut grid, jobs) = grid([6, 6, 6]);
    let view = view();
    let points = [
        point(Vec3::new(0.0, 0.0, -10.0), 0.5, 4.0),
        point(Vec3::new(5.0, 3.0, -30.0), 0.5, 9.0),
    ];
    let spots = [spot(Vec3::new(-4.0, -2.0, -20.0), 7.0)];
    grid.rebuild(&jobs, &view, &points, &spots);

    let offsets = grid.offsets();
    assert_eq!(offsets.len(), grid.cell_count());
    for pair in offsets.windows(2) {
        assert_eq!(
            pair[0].index_offset + pair[0].point_count as u32 + pair[0].spot_count as u32,
            pair[1].index_offset,
        );
    }
    let last = offsets[offsets.len() - 1];
    assert_eq!(
        last.index_offset + last.point_count as u32 + last.spot_count as u32,
        grid.indices().len() as u32,
    );

    // Within one cell, point indices precede spot indices in the flat list.
    for (cell_index, entry) in offsets.iter().enumerate() {
        let start = entry.index_offset as usize;
        let points_end = start + entry.point_count as usize;
        let spots_end = points_end + entry.spot_count as usize;
        let x = (cell_index % 6) as u32;
        let y = ((cell_index / 6) % 6) as u32;
        let z = (cell_index / 36) as u32;
        let cell = grid.cell(x, y, z);
        assert_eq!(&grid.indices()[start..points_end], cell
            .point_lights
            .iter()
            .map(|&i| i as u32)
            .collect::<Vec<_>>()
            .as_slice());
        assert_eq!(spots_end - points_end, cell.spot_lights.len());
    }
}

#[test]
fn light_outside_the_depth_range_contributes_nothing() {
    let (mut grid, jobs) = grid([4, 4, 4]);
    let view = view();
    // Entirely behind the camera.
    grid.rebuild(&jobs, &view, &[point(Vec3::new(0.0, 0.0, 60.0), 1.0, 5.0)], &[]);
    assert_eq!(grid.metrics().light_assignments, 0);
    assert!(grid.indices().is_empty());
    assert!(grid.offsets().iter().all(|entry| entry.point_count == 0 && entry.spot_count == 0));
}

#[test]
fn rebuild_is_deterministic_for_identical_input() {
    let (mut grid, jobs) = grid([8, 4, 4]);
    let view = view();
    let points = [
        point(Vec3::new(1.0, 0.5, -12.0), 0.5, 6.0),
        point(Vec3::new(-2.0, -1.0, -25.0), 1.0, 10.0),
    ];
    grid.rebuild(&jobs, &view, &points, &[]);
    let mut first: Vec<u32> = grid.indices().to_vec();
    let first_offsets = grid.offsets().to_vec();

    grid.invalidate_cache();
    grid.rebuild(&jobs, &view, &points, &[]);
    let mut second: Vec<u32> = grid.indices().to_vec();
    assert_eq!(first_offsets, grid.offsets().to_vec());
    // Index lists within a cell carry no ordering guarantee; compare sorted.
    first.sort_unstable();
    second.sort_unstable();
    assert_eq!(first, second);
}
