use std::io;
use std::sync::{Arc, Mutex};
use std::thread;

use bigcore::{
    AffinityBackend, AffinityClass, AffinityController, CoreTopology, PoolConfig, PoolError,
    Result, WorkerPool,
};

/// (thread name, class, cpus) for every pin request.
type Calls = Arc<Mutex<Vec<(String, AffinityClass, Vec<usize>)>>>;

#[derive(Debug, Default, Clone)]
struct RecordingBackend {
    calls: Calls,
}

impl AffinityBackend for RecordingBackend {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn pin_current_thread(&self, class: AffinityClass, cpus: &[usize]) -> Result<()> {
        let name = thread::current().name().unwrap_or_default().to_owned();
        self.calls.lock().unwrap().push((name, class, cpus.to_vec()));
        Ok(())
    }

    fn available_cpus(&self) -> Vec<usize> {
        vec![0, 1, 2, 3, 4, 5]
    }
}

#[derive(Debug)]
struct RejectingBackend;

impl AffinityBackend for RejectingBackend {
    fn name(&self) -> &'static str {
        "rejecting"
    }

    fn pin_current_thread(&self, class: AffinityClass, _cpus: &[usize]) -> Result<()> {
        Err(PoolError::AffinityRejected {
            class,
            source: io::Error::from(io::ErrorKind::InvalidInput),
        })
    }

    fn available_cpus(&self) -> Vec<usize> {
        vec![0]
    }
}

fn topology() -> CoreTopology {
    CoreTopology {
        performance: vec![4, 5],
        efficiency: vec![0, 1],
    }
}

#[test]
fn every_worker_pins_itself_to_performance_cores() {
    let backend = RecordingBackend::default();
    let calls = Arc::clone(&backend.calls);
    let pool =
        WorkerPool::with_controller(3, AffinityController::with_backend(topology(), backend))
            .unwrap();
    pool.shutdown();

    let mut calls = calls.lock().unwrap().clone();
    calls.sort_by(|a, b| a.0.cmp(&b.0));
    let expected: Vec<_> = (0..3)
        .map(|i| {
            (
                format!("pool-worker-{i}"),
                AffinityClass::Performance,
                vec![4, 5],
            )
        })
        .collect();
    assert_eq!(calls, expected);
}

#[test]
fn controller_routes_each_class_to_its_cpus() {
    let backend = RecordingBackend::default();
    let calls = Arc::clone(&backend.calls);
    let controller = AffinityController::with_backend(topology(), backend);

    controller.pin_to_performance_cores();
    controller.pin_to_efficiency_cores();
    controller.release_affinity();

    let classes: Vec<_> = calls
        .lock()
        .unwrap()
        .iter()
        .map(|(_, class, cpus)| (*class, cpus.clone()))
        .collect();
    assert_eq!(
        classes,
        vec![
            (AffinityClass::Performance, vec![4, 5]),
            (AffinityClass::Efficiency, vec![0, 1]),
            (AffinityClass::Unconstrained, vec![0, 1, 2, 3, 4, 5]),
        ]
    );
}

#[test]
fn empty_class_is_not_applied() {
    let backend = RecordingBackend::default();
    let calls = Arc::clone(&backend.calls);
    let controller = AffinityController::with_backend(
        CoreTopology {
            performance: vec![],
            efficiency: vec![0],
        },
        backend,
    );

    controller.pin_to_performance_cores();
    assert!(calls.lock().unwrap().is_empty());
}

#[test]
fn rejected_affinity_does_not_affect_the_pool() {
    let controller = AffinityController::with_backend(topology(), RejectingBackend);
    controller.pin_to_performance_cores();
    controller.pin_to_performance_cores();
    controller.release_affinity();

    let pool = WorkerPool::with_controller(2, controller).unwrap();
    assert_eq!(pool.enqueue(|| 42).unwrap().join().unwrap(), 42);
}

#[test]
fn disabled_pinning_selects_the_noop_backend() {
    let config = PoolConfig {
        pin_workers: false,
        ..PoolConfig::default()
    };
    let controller = AffinityController::detect(&config);
    assert_eq!(controller.backend_name(), "no-op");
    assert_eq!(controller.current_thread_cpus(), None);

    let pool = WorkerPool::with_config(&config).unwrap();
    assert_eq!(pool.affinity().backend_name(), "no-op");
}

#[cfg(target_os = "linux")]
#[test]
fn native_backend_pins_the_calling_thread_only() {
    let controller = AffinityController::detect(&PoolConfig::default());
    assert_eq!(controller.backend_name(), "native");

    let before_main = controller.current_thread_cpus().unwrap();

    let reader = controller.clone();
    thread::spawn(move || {
        let original = reader.current_thread_cpus().unwrap();
        let first = original[0];
        let pinned = AffinityController::detect(&PoolConfig {
            topology: CoreTopology {
                performance: vec![first],
                efficiency: vec![],
            },
            ..PoolConfig::default()
        });

        pinned.pin_to_performance_cores();
        assert_eq!(pinned.current_thread_cpus().unwrap(), vec![first]);

        pinned.release_affinity();
        let released = pinned.current_thread_cpus().unwrap();
        assert!(released.contains(&first));
        assert!(released.len() >= original.len());
    })
    .join()
    .unwrap();

    assert_eq!(controller.current_thread_cpus().unwrap(), before_main);
}
