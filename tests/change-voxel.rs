use std::error::Error;
mod common;
use glam::I16Vec3;
use mtmap::{ContentRef, World};

async fn change_voxel(world: &World) -> Result<(), mtmap::Error> {
    let pos = I16Vec3::new(0, 0, 0);

    let mut vm = world.get_voxel_manip(true).await?;
    vm.set_content(pos, b"default:diamond").await?;
    let node = vm.get_node(pos).await?;
    assert_eq!(node.param0, ContentRef::Name(b"default:diamond".to_vec()));

    vm.commit().await?;
    std::mem::drop(vm);

    let mut vm = world.get_voxel_manip(true).await?;
    let node = vm.get_node(pos).await?;
    assert_eq!(node.param0, ContentRef::Name(b"default:diamond".to_vec()));
    Ok(())
}

#[async_std::test]
async fn test_change() -> Result<(), Box<dyn Error>> {
    let dir = common::tear_up("change-voxel")?;
    let world = World::open(&dir);
    // No early return here, so that tear down happens in every case
    let result = change_voxel(&world).await;
    let cleanup_result = common::tear_down(&dir);
    result?;
    cleanup_result?;
    Ok(())
}
