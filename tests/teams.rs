//! Teams: splits, rank translation, predefined teams, destruction.

use ironmem::testing::run_spmd;
use ironmem::TeamConfig;

#[test]
fn world_team_matches_the_runtime() {
    run_spmd(4, |shmem| {
        let world = shmem.team_world();
        assert_eq!(world.n_pes(), 4);
        assert_eq!(world.my_pe(), shmem.my_pe());
        assert_eq!(world.world_pe(2)?, 2);
        world.sync()?;

        Ok(())
    });
}

#[test]
fn shared_and_node_cover_the_thread_world() {
    run_spmd(3, |shmem| {
        // One process, so everyone shares memory and a node.
        assert_eq!(shmem.team_shared().n_pes(), 3);
        assert_eq!(shmem.team_node().n_pes(), 3);
        shmem.team_shared().sync()?;
        shmem.team_node().sync()?;

        Ok(())
    });
}

#[test]
fn strided_split_selects_the_right_members() {
    run_spmd(6, |shmem| {
        let me = shmem.my_pe();
        let world = shmem.team_world();

        // Even world ranks: 0, 2, 4.
        let evens = world.split_strided(0, 2, 3, &TeamConfig::default())?;
        match evens {
            Some(team) => {
                assert_eq!(me % 2, 0);
                assert_eq!(team.n_pes(), 3);
                assert_eq!(team.my_pe(), me / 2);
                assert_eq!(team.world_pe(team.my_pe())?, me);
                team.sync()?;
                team.destroy()?;
            }
            None => assert_eq!(me % 2, 1),
        }

        Ok(())
    });
}

#[test]
fn identity_split_reproduces_the_parent() {
    run_spmd(4, |shmem| {
        let world = shmem.team_world();
        let copy = world
            .split_strided(0, 1, 4, &TeamConfig::default())?
            .expect("everyone is a member of the identity split");
        assert_eq!(copy.n_pes(), world.n_pes());
        assert_eq!(copy.my_pe(), world.my_pe());
        for rank in 0..4 {
            assert_eq!(
                shmem.team_translate_pe(&copy, rank, &world)?,
                rank
            );
        }
        copy.destroy()?;

        Ok(())
    });
}

#[test]
fn translate_round_trips_and_rejects_strangers() {
    run_spmd(6, |shmem| {
        let world = shmem.team_world();
        let evens = world.split_strided(0, 2, 3, &TeamConfig::default())?;
        let odds = world.split_strided(1, 2, 3, &TeamConfig::default())?;
        assert!(
            evens.is_some() != odds.is_some(),
            "every PE is in exactly one parity team"
        );

        if let Some(evens) = &evens {
            // evens rank r is world rank 2r; translating through world and
            // back is the identity.
            for r in 0..3 {
                let w = shmem.team_translate_pe(evens, r, &world)?;
                assert_eq!(w, 2 * r);
                assert_eq!(shmem.team_translate_pe(&world, w, evens)?, r);
            }
            // World rank 1 is no even; translation reports -1.
            assert_eq!(shmem.team_translate_pe(&world, 1, evens)?, -1);
            assert!(shmem.team_translate_pe(evens, 7, &world).is_err());
        }

        // Disjoint teams tear down independently.
        if let Some(evens) = evens {
            evens.destroy()?;
        }
        if let Some(odds) = odds {
            odds.destroy()?;
        }

        Ok(())
    });
}

#[test]
fn split_2d_builds_rows_and_columns() {
    run_spmd(6, |shmem| {
        let me = shmem.my_pe();
        let world = shmem.team_world();
        let (x, y) = world
            .split_2d(3, &TeamConfig::default(), &TeamConfig::default())?;

        let x = x.expect("every PE has a row");
        let y = y.expect("every PE has a column");

        // 2 rows of 3, 3 columns of 2.
        assert_eq!(x.n_pes(), 3);
        assert_eq!(y.n_pes(), 2);
        assert_eq!(x.my_pe(), me % 3);
        assert_eq!(y.my_pe(), me / 3);
        assert_eq!(x.world_pe(0)?, (me / 3) * 3);
        assert_eq!(y.world_pe(0)?, me % 3);

        x.sync()?;
        y.sync()?;
        y.destroy()?;
        x.destroy()?;

        Ok(())
    });
}

#[test]
fn destroyed_teams_release_their_slot() {
    run_spmd(2, |shmem| {
        let world = shmem.team_world();
        // Churn through more teams than the pool holds live at once.
        for _ in 0..40 {
            let t = world
                .split_strided(0, 1, 2, &TeamConfig::default())?
                .expect("both PEs are members");
            t.sync()?;
            t.destroy()?;
        }

        Ok(())
    });
}

#[test]
fn predefined_teams_cannot_be_destroyed() {
    run_spmd(2, |shmem| {
        let world = shmem.team_world();
        assert!(world.destroy().is_err());
        let shared = shmem.team_shared();
        assert!(shared.destroy().is_err());

        Ok(())
    });
}

#[test]
fn bad_split_arguments_are_rejected() {
    run_spmd(4, |shmem| {
        let world = shmem.team_world();
        let cfg = TeamConfig::default();
        assert!(world.split_strided(-1, 1, 2, &cfg).is_err());
        assert!(world.split_strided(0, 0, 2, &cfg).is_err());
        assert!(world.split_strided(0, 1, 0, &cfg).is_err());
        // 0, 3, 6 — rank 6 does not exist in a team of 4.
        assert!(world.split_strided(0, 3, 3, &cfg).is_err());

        Ok(())
    });
}
