//! Demo workload: submits a representative mix of compute, VFS, network,
//! and dependency-graph tasks, then waits for the system to drain.

use std::sync::Arc;
use std::time::Duration;

use crate::hal::Hal;
use crate::kernel::Kernel;
use crate::sched::{Priority, TaskId};

/// Runs the simulation sequence against a booted kernel.
pub fn run_simulation(kernel: &Kernel) {
    kernel.log().info("starting simulation sequence");

    // Compute burst.
    for _ in 0..100 {
        kernel
            .submit(
                Priority::High,
                Box::new(|| {
                    let mut v = 0f64;
                    for j in 0..1_000 {
                        v += (j as f64).sin() * (j as f64).cos();
                    }
                    std::hint::black_box(v);
                }),
                &[],
            )
            .expect("submit compute task");
    }

    // VFS writer.
    let vfs = Arc::clone(kernel.vfs());
    kernel
        .submit(
            Priority::Normal,
            Box::new(move || {
                for i in 0..10 {
                    vfs.create_file(&format!("/proc/task_{i}"), b"status: running")
                        .ok();
                }
            }),
            &[],
        )
        .expect("submit vfs task");

    // Packet feeder.
    let net = Arc::clone(kernel.net());
    kernel
        .submit(
            Priority::Realtime,
            Box::new(move || {
                for i in 0..50 {
                    net.receive_packet(format!("ping packet {i}").as_bytes());
                    Hal::cpu_relax();
                }
            }),
            &[],
        )
        .expect("submit net task");

    // Dependency fan-out: one parent releases a batch of children, and a
    // join task waits for all of them.
    let parent = kernel
        .submit(Priority::Normal, Box::new(|| {}), &[])
        .expect("submit fan-out parent");
    let children: Vec<TaskId> = (0..8)
        .map(|_| {
            kernel
                .submit(Priority::Normal, Box::new(|| {}), &[parent])
                .expect("submit fan-out child")
        })
        .collect();
    let log = Arc::clone(kernel.log());
    kernel
        .submit(
            Priority::Normal,
            Box::new(move || log.info("fan-out joined")),
            &children,
        )
        .expect("submit fan-out join");

    if kernel.wait_quiescent(Duration::from_secs(10)) {
        kernel.log().info("simulation complete");
    } else {
        kernel.log().warn("simulation did not drain in time");
    }
}
