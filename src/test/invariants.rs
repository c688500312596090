#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use crate::comm::pattern::{sort_comm_slots, Pattern};
    use crate::partition::{build_layout, Layout, PartitionSpec, Topology, Weights};
    use crate::primitives::shape::Shape;
    use crate::primitives::sig::Sig;
    use crate::primitives::tile::{Side, Tile};
    use crate::runtime::{Controller, DeviceKind, DeviceSelection, World};
    use crate::stencil::{num_slots, Stencil};
    use crate::tiles::{CommArgs, EngineTiles};

    fn five_point_2d() -> Stencil {
        Stencil::new(
            Shape::from_sigs([Sig::new(-1, 2), Sig::new(-1, 2)]).unwrap(),
            vec![0., 1., 0., 1., 0., 1., 0., 1., 0.],
        )
        .unwrap()
    }

    proptest! {
        /// Every partition type tiles the distributed shape exactly: block
        /// sizes sum to the domain size and blocks are pairwise disjoint.
        #[test]
        fn partition_covers_domain(
            rows in 1usize..40,
            cols in 1usize..40,
            ranks in 1usize..7,
            which in 0usize..4,
            w0 in 0.0f32..4.0,
            w1 in 0.0f32..4.0,
            w2 in 0.0f32..4.0,
        ) {
            let inner = Shape::from_sigs([
                Sig::new(1, 1 + rows as isize),
                Sig::new(1, 1 + cols as isize),
            ]).unwrap();
            let spec = match which {
                0 => PartitionSpec::MultiDim(None),
                1 => PartitionSpec::SingleDim(1),
                2 => PartitionSpec::NotDim(0),
                _ => PartitionSpec::Weighted(0),
            };
            let mut ratios = vec![w0, w1, w2, 1.0, 1.0, 1.0];
            ratios.truncate(ranks);
            if ratios.iter().sum::<f32>() <= 0.0 {
                ratios[0] = 1.0;
            }
            let weights = Weights { ratios };
            let lay = build_layout(spec, ranks, 0, &inner, &weights).unwrap();

            let mut covered = 0usize;
            for r in 0..ranks {
                covered += lay.shape_of(r).map(|s| s.size()).unwrap_or(0);
            }
            prop_assert_eq!(covered, inner.size());

            for a in 0..ranks {
                for b in a + 1..ranks {
                    if let (Some(sa), Some(sb)) = (lay.shape_of(a), lay.shape_of(b)) {
                        prop_assert!(sa.intersect(sb).is_none());
                    }
                }
            }
        }

        /// The weighted rounding rule: floor per rank, residual to the last
        /// rank with nonzero weight.
        #[test]
        fn weighted_rounding_is_floor_plus_residual(
            total in 1usize..100,
            w in proptest::collection::vec(0u32..5, 1..5),
        ) {
            prop_assume!(w.iter().any(|&x| x > 0));
            let ratios: Vec<f32> = w.iter().map(|&x| x as f32).collect();
            let inner = Shape::from_sigs([Sig::new(0, total as isize)]).unwrap();
            let lay = Layout::weighted(
                Topology::plain(w.len()),
                inner,
                0,
                &Weights { ratios: ratios.clone() },
                0,
            ).unwrap();
            let sum: f32 = ratios.iter().sum();
            let mut expect: Vec<usize> = ratios
                .iter()
                .map(|&r| ((total as f64) * (r as f64) / (sum as f64)).floor() as usize)
                .collect();
            let residual = total - expect.iter().sum::<usize>();
            let last = ratios.iter().rposition(|&r| r > 0.0).unwrap();
            expect[last] += residual;
            for (r, want) in expect.iter().enumerate() {
                let got = lay.shape_of(r).map(|s| s.card(0)).unwrap_or(0);
                prop_assert_eq!(got, *want);
            }
        }
    }

    /// Mirror-slot symmetry: an active inbound halo on one rank pairs with
    /// an active outbound border on its neighbor, in the same slot, with
    /// identical per-axis cardinality.
    #[test]
    fn halo_slots_pair_up_across_ranks() {
        let st = five_point_2d();
        let inner = Shape::from_sigs([Sig::new(1, 13), Sig::new(1, 10)]).unwrap();
        for num_ranks in [2usize, 3, 4] {
            let lays: Vec<Layout> = (0..num_ranks)
                .map(|r| {
                    build_layout(
                        PartitionSpec::SingleDim(0),
                        num_ranks,
                        r,
                        &inner,
                        &Weights::uniform(num_ranks),
                    )
                    .unwrap()
                })
                .collect();
            let ctrl: Controller<f32> = Controller::new(DeviceKind::Cpu);
            let global = Tile::domain(Shape::of_sizes(&[14, 11]).unwrap());
            let families: Vec<(CommArgs, EngineTiles<f32>)> = lays
                .iter()
                .map(|lay| {
                    let args = CommArgs::new(&st, lay);
                    let tiles =
                        EngineTiles::create(&ctrl, lay, &global, &st.borders(), &args);
                    (args, tiles)
                })
                .collect();

            for (r, (args, tiles)) in families.iter().enumerate() {
                for slot in 0..num_slots(2) {
                    if !args.border_in_active[slot] {
                        continue;
                    }
                    let shift = args.shifts_in[slot].as_ref().unwrap();
                    let q = lays[r].neighbor(shift).unwrap();
                    let (q_args, q_tiles) = &families[q];
                    assert!(
                        q_args.border_out_active[slot],
                        "rank {q} slot {slot} should send what rank {r} receives"
                    );
                    let halo = tiles.border_in[slot].as_ref().unwrap();
                    let out = q_tiles.border_out[slot].as_ref().unwrap();
                    assert_eq!(halo.shape().cards(), out.shape().cards());
                    // The halo *is* the neighbor's border: same coordinates.
                    assert_eq!(halo.shape(), out.shape());
                }
            }
        }
    }

    /// After an exchange, halo cells are bit-equal to the cells of the
    /// sender's outbound border.
    #[test]
    fn exchange_moves_borders_bit_exact() {
        let st = five_point_2d();
        let inner = Shape::from_sigs([Sig::new(1, 9), Sig::new(1, 9)]).unwrap();
        let results = World::run::<f32, (), _>(
            2,
            crate::config::EngineConfig::default(),
            DeviceSelection::uniform_cpu(),
            |ctx| {
                let lay = build_layout(
                    PartitionSpec::SingleDim(0),
                    2,
                    ctx.rank,
                    &inner,
                    &Weights::uniform(2),
                )
                .unwrap();
                let ctrl = ctx.controller();
                let global = Tile::domain(Shape::of_sizes(&[10, 10]).unwrap());
                let args = CommArgs::new(&st, &lay);
                let mut tiles = EngineTiles::create(&ctrl, &lay, &global, &st.borders(), &args);

                // Stamp every owned cell with rank*1000 + flat position.
                {
                    let mut v = tiles.mat.view_mut(Side::Host);
                    let points: Vec<_> = lay.my_shape().unwrap().points().collect();
                    for (n, p) in points.iter().enumerate() {
                        v.set(p, (ctx.rank * 1000 + n) as f32);
                    }
                }

                let order = sort_comm_slots(&tiles, &args);
                tiles.pattern = Some(Pattern::build(&tiles, &args, &lay, &order, false));
                tiles
                    .pattern
                    .as_ref()
                    .unwrap()
                    .run_on(&ctx.comm, Side::Host)?;

                // My halo must now hold, bit-exact, the cells the peer
                // stamped at the same global coordinates.
                let peer = 1 - ctx.rank;
                let peer_lay = build_layout(
                    PartitionSpec::SingleDim(0),
                    2,
                    peer,
                    &inner,
                    &Weights::uniform(2),
                )
                .unwrap();
                let peer_shape = peer_lay.shape_of(peer).unwrap();
                for slot in 0..num_slots(2) {
                    if !args.border_in_active[slot] {
                        continue;
                    }
                    let halo = tiles.border_in[slot].as_ref().unwrap();
                    let view = tiles.mat.view(Side::Host);
                    for p in halo.shape().points() {
                        let got = view.get(&p);
                        let want = (peer * 1000 + peer_shape.offset_of(&p)) as f32;
                        assert!(
                            got.to_bits() == want.to_bits(),
                            "halo cell {p:?} holds {got}, want {want}"
                        );
                    }
                }
                Ok(())
            },
        );
        for r in results {
            r.unwrap();
        }
    }

    /// A 1x1 process grid reaches no neighbors: every slot deactivates and
    /// the pattern is empty.
    #[test]
    fn single_rank_pattern_is_empty() {
        let st = five_point_2d();
        let inner = Shape::from_sigs([Sig::new(1, 5), Sig::new(1, 5)]).unwrap();
        let lay = build_layout(
            PartitionSpec::MultiDim(None),
            1,
            0,
            &inner,
            &Weights::uniform(1),
        )
        .unwrap();
        let ctrl: Controller<f32> = Controller::new(DeviceKind::Cpu);
        let global = Tile::domain(Shape::of_sizes(&[6, 6]).unwrap());
        let args = CommArgs::new(&st, &lay);
        let tiles = EngineTiles::create(&ctrl, &lay, &global, &st.borders(), &args);
        assert!(args.comm_slots().count() == 0);
        let order = sort_comm_slots(&tiles, &args);
        let pattern = Pattern::build(&tiles, &args, &lay, &order, false);
        assert!(pattern.is_empty());
        // With no active out-neighbor the inner region is the whole block.
        assert_eq!(
            tiles.inner.as_ref().unwrap().shape(),
            lay.my_shape().unwrap()
        );
    }
}
