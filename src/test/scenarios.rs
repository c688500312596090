#[cfg(test)]
mod test {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use crate::alb::AlbKind;
    use crate::comm::CommMethod;
    use crate::config::EngineConfig;
    use crate::engine::{stencil_computation, RunStats, StencilProgram};
    use crate::error::EpsilodError;
    use crate::kernels::{update_cell_default, KernelSet};
    use crate::partition::PartitionSpec;
    use crate::primitives::shape::Shape;
    use crate::primitives::sig::Sig;
    use crate::runtime::{DeviceSelection, World};
    use crate::stencil::Stencil;

    type ResultMap = Arc<Mutex<HashMap<Vec<isize>, f32>>>;

    fn five_point_2d() -> Stencil {
        Stencil::new(
            Shape::from_sigs([Sig::new(-1, 2), Sig::new(-1, 2)]).unwrap(),
            vec![0., 1., 0., 1., 0., 1., 0., 1., 0.],
        )
        .unwrap()
    }

    fn twentyseven_point_3d() -> Stencil {
        Stencil::new(
            Shape::from_sigs([Sig::new(-1, 2), Sig::new(-1, 2), Sig::new(-1, 2)]).unwrap(),
            vec![1.0; 27],
        )
        .unwrap()
    }

    /// A program whose cells are seeded from their global coordinates and
    /// whose output lands in a shared map keyed by coordinate.
    fn program(
        sizes: Vec<usize>,
        stencil: Stencil,
        factor: f32,
        iterations: usize,
        results: ResultMap,
    ) -> StencilProgram<f32, ()> {
        let strides: Vec<isize> = {
            let mut acc = 1isize;
            let mut s: Vec<isize> = sizes
                .iter()
                .rev()
                .map(|&n| {
                    let cur = acc;
                    acc *= n as isize;
                    cur
                })
                .collect();
            s.reverse();
            s
        };
        let init: crate::kernels::HostInitFn<f32, ()> = Arc::new(move |mut ctx| {
            let points: Vec<_> = ctx.mat.shape().points().collect();
            for p in points {
                let v: isize = p.iter().zip(&strides).map(|(&i, &s)| i * s).sum();
                ctx.mat.set(&p, v as f32);
            }
            Ok(())
        });
        let output: crate::kernels::OutputFn<f32, ()> = Arc::new(move |view, _| {
            let mut map = results.lock().expect("result map");
            for p in view.shape().points() {
                map.insert(p.to_vec(), view.get(&p));
            }
            Ok(())
        });
        StencilProgram {
            sizes,
            stencil,
            factor,
            iterations,
            init: Some(init),
            dev_init: None,
            init_copy: None,
            update: KernelSet::single(update_cell_default::<f32, ()>()),
            output: Some(output),
            ext: (),
        }
    }

    fn init_tracing() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    }

    fn run_distributed(
        num_ranks: usize,
        config: EngineConfig,
        device: DeviceSelection,
        sizes: Vec<usize>,
        stencil: Stencil,
        factor: f32,
        iterations: usize,
    ) -> (HashMap<Vec<isize>, f32>, Vec<RunStats>) {
        init_tracing();
        let results: ResultMap = Arc::new(Mutex::new(HashMap::new()));
        let prog = program(sizes, stencil, factor, iterations, results.clone());
        let stats: Vec<RunStats> = World::run(num_ranks, config, device, |ctx| {
            stencil_computation(&ctx, &prog)
        })
        .into_iter()
        .map(|r| r.unwrap())
        .collect();
        let map = results.lock().expect("result map").clone();
        (map, stats)
    }

    fn reference(sizes: Vec<usize>, stencil: Stencil, factor: f32, iterations: usize) -> HashMap<Vec<isize>, f32> {
        run_distributed(
            1,
            EngineConfig::default(),
            DeviceSelection::uniform_cpu(),
            sizes,
            stencil,
            factor,
            iterations,
        )
        .0
    }

    fn assert_bit_equal(got: &HashMap<Vec<isize>, f32>, want: &HashMap<Vec<isize>, f32>) {
        assert_eq!(got.len(), want.len(), "output cell count differs");
        for (p, v) in want {
            let g = got.get(p).unwrap_or_else(|| panic!("missing cell {p:?}"));
            assert!(
                g.to_bits() == v.to_bits(),
                "cell {p:?}: got {g}, want {v}"
            );
        }
    }

    #[test]
    fn jacobi_two_ranks_matches_single_rank() {
        // 2-D 5-point Jacobi, 4x4 domain, 2 ranks on axis 0, 1 iteration.
        let (got, _) = run_distributed(
            2,
            EngineConfig::default(),
            DeviceSelection::uniform_cpu(),
            vec![4, 4],
            five_point_2d(),
            4.0,
            1,
        );
        let want = reference(vec![4, 4], five_point_2d(), 4.0, 1);
        assert_bit_equal(&got, &want);

        // Interior cells are the mean of their four neighbors; global
        // border cells keep their seeded values.
        assert_eq!(got[&vec![1, 1]], (1.0 + 4.0 + 6.0 + 9.0) / 4.0);
        assert_eq!(got[&vec![0, 2]], 2.0);
        assert_eq!(got[&vec![3, 3]], 15.0);
        assert_eq!(got.len(), 16);
    }

    #[test]
    fn comm_methods_agree() {
        let want = reference(vec![6, 6], five_point_2d(), 4.0, 3);
        for (method, dev_aware) in [
            (CommMethod::HostWaitAny, false),
            (CommMethod::HostWaitAnyRecvFirst, false),
            (CommMethod::HostWaitAll, false),
            (CommMethod::HostWaitAny, true),
        ] {
            let config = EngineConfig {
                comm_method: method,
                dev_aware,
                ..EngineConfig::default()
            };
            let (got, _) = run_distributed(
                2,
                config,
                DeviceSelection::uniform_cpu(),
                vec![6, 6],
                five_point_2d(),
                4.0,
                3,
            );
            assert_bit_equal(&got, &want);
        }
    }

    #[test]
    fn multi_dim_partition_matches_reference() {
        let want = reference(vec![10, 10], five_point_2d(), 4.0, 4);
        let config = EngineConfig {
            partition: PartitionSpec::MultiDim(None),
            ..EngineConfig::default()
        };
        let (got, _) = run_distributed(
            4,
            config,
            DeviceSelection::uniform_cpu(),
            vec![10, 10],
            five_point_2d(),
            4.0,
            4,
        );
        assert_bit_equal(&got, &want);
    }

    #[test]
    fn weighted_alb_redistributes_and_matches_reference() {
        // 3-D 27-point, 8x8x8, weighted partition w0 with weights [1, 3],
        // 10 iterations, ConstIters ALB with a window that can fill.
        let config = EngineConfig {
            partition: PartitionSpec::Weighted(0),
            alb: AlbKind::ConstIters,
            alb_window: 4,
            ..EngineConfig::default()
        };
        let (got, stats) = run_distributed(
            2,
            config,
            DeviceSelection::with_weights(&[1.0, 3.0]),
            vec![8, 8, 8],
            twentyseven_point_3d(),
            27.0,
            10,
        );
        assert!(
            stats.iter().any(|s| s.rebalances >= 1),
            "expected at least one redistribute event, got {stats:?}"
        );
        let want = reference(vec![8, 8, 8], twentyseven_point_3d(), 27.0, 10);
        assert_bit_equal(&got, &want);
    }

    #[test]
    fn alb_without_weighted_partition_is_disabled() {
        let config = EngineConfig {
            partition: PartitionSpec::SingleDim(0),
            alb: AlbKind::ConstIters,
            alb_window: 2,
            ..EngineConfig::default()
        };
        let (got, stats) = run_distributed(
            2,
            config,
            DeviceSelection::uniform_cpu(),
            vec![6, 6],
            five_point_2d(),
            4.0,
            6,
        );
        assert!(stats.iter().all(|s| s.rebalances == 0));
        let want = reference(vec![6, 6], five_point_2d(), 4.0, 6);
        assert_bit_equal(&got, &want);
    }

    #[test]
    fn zero_iterations_outputs_initial_data() {
        let (got, _) = run_distributed(
            2,
            EngineConfig::default(),
            DeviceSelection::uniform_cpu(),
            vec![4, 4],
            five_point_2d(),
            4.0,
            0,
        );
        assert_eq!(got.len(), 16);
        for (p, v) in &got {
            assert_eq!(*v, (p[0] * 4 + p[1]) as f32);
        }
    }

    /// Seed with zeros on the global border and coordinates inside, so the
    /// copy buffer's untouched border cells agree with the matrix.
    fn zero_border_program(
        iterations: usize,
        init_copy: Option<crate::kernels::UpdateFn<f32, ()>>,
        results: ResultMap,
    ) -> StencilProgram<f32, ()> {
        let init: crate::kernels::HostInitFn<f32, ()> = Arc::new(move |mut ctx| {
            let points: Vec<_> = ctx.mat.shape().points().collect();
            for p in points {
                let interior = p.iter().all(|&i| i > 0 && i < 7);
                let v = if interior { (p[0] * 8 + p[1]) as f32 } else { 0.0 };
                ctx.mat.set(&p, v);
            }
            Ok(())
        });
        let output: crate::kernels::OutputFn<f32, ()> = Arc::new(move |view, _| {
            let mut map = results.lock().expect("result map");
            for p in view.shape().points() {
                map.insert(p.to_vec(), view.get(&p));
            }
            Ok(())
        });
        StencilProgram {
            sizes: vec![8, 8],
            stencil: five_point_2d(),
            factor: 4.0,
            iterations,
            init: Some(init),
            dev_init: None,
            init_copy,
            update: KernelSet::single(update_cell_default::<f32, ()>()),
            output: Some(output),
            ext: (),
        }
    }

    fn run_zero_border(
        num_ranks: usize,
        config: EngineConfig,
        iterations: usize,
        init_copy: Option<crate::kernels::UpdateFn<f32, ()>>,
    ) -> HashMap<Vec<isize>, f32> {
        let results: ResultMap = Arc::new(Mutex::new(HashMap::new()));
        let prog = zero_border_program(iterations, init_copy, results.clone());
        for r in World::run(num_ranks, config, DeviceSelection::uniform_cpu(), |ctx| {
            stencil_computation(&ctx, &prog)
        }) {
            r.unwrap();
        }
        let map = results.lock().expect("result map").clone();
        map
    }

    #[test]
    fn init_copy_step_matches_device_copy() {
        // An identity first step makes the copy buffer equal to the matrix,
        // which is exactly what the device copy kernel produces.
        let identity: crate::kernels::UpdateFn<f32, ()> = Arc::new(|mut k| {
            let points: Vec<_> = k.out.shape().points().collect();
            for p in points {
                let v = k.inp.get(&p);
                k.out.set(&p, v);
            }
        });
        let want = run_zero_border(1, EngineConfig::default(), 3, None);
        let got = run_zero_border(2, EngineConfig::default(), 3, Some(identity));
        assert_bit_equal(&got, &want);
    }

    #[test]
    fn host_copy_init_matches_device_copy() {
        let config = EngineConfig {
            host_copy_init: true,
            ..EngineConfig::default()
        };
        let want = reference(vec![6, 6], five_point_2d(), 4.0, 3);
        let (got, _) = run_distributed(
            2,
            config,
            DeviceSelection::uniform_cpu(),
            vec![6, 6],
            five_point_2d(),
            4.0,
            3,
        );
        assert_bit_equal(&got, &want);
    }

    #[test]
    fn too_fine_partition_fails_on_every_rank() {
        // Radius-2 stencil on a 9x9 domain split three ways: blocks of one
        // or two rows cannot host a two-cell halo.
        let radius2 = Stencil::new(
            Shape::from_sigs([Sig::new(-2, 3), Sig::new(-2, 3)]).unwrap(),
            vec![1.0; 25],
        )
        .unwrap();
        let results: ResultMap = Arc::new(Mutex::new(HashMap::new()));
        let prog = program(vec![9, 9], radius2, 25.0, 2, results);
        let outcomes = World::run::<f32, RunStats, _>(
            3,
            EngineConfig::default(),
            DeviceSelection::uniform_cpu(),
            |ctx| stencil_computation(&ctx, &prog),
        );
        for r in outcomes {
            match r {
                Err(EpsilodError::PartitionTooFine { axis }) => assert_eq!(axis, 0),
                other => panic!("expected PartitionTooFine, got {other:?}"),
            }
        }
    }

    #[test]
    fn inactive_rank_participates_in_clocks_only() {
        // Four ranks over two distributable rows: two ranks get no work but
        // the run still completes and covers the domain.
        let (got, _) = run_distributed(
            4,
            EngineConfig::default(),
            DeviceSelection::uniform_cpu(),
            vec![4, 4],
            five_point_2d(),
            4.0,
            2,
        );
        let want = reference(vec![4, 4], five_point_2d(), 4.0, 2);
        assert_bit_equal(&got, &want);
    }
}
