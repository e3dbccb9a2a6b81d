mod common;

use assert_matches::assert_matches;
use batchline::{
    entities::ingredient,
    errors::ServiceError,
    models::BaseIngredient,
    services::{
        bom::{resolve_with, ResolutionCache},
        recipes::RecipeInput,
    },
};
use common::{raw, sub, TestApp};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::ActiveModelTrait;

fn quantity_of(lines: &[BaseIngredient], item_id: i32) -> Decimal {
    lines
        .iter()
        .filter(|l| l.item_id == item_id)
        .map(|l| l.quantity)
        .sum()
}

#[tokio::test]
async fn flat_recipe_resolves_to_its_own_edges() {
    let app = TestApp::new().await;
    let flour = app.item("Flour", "grams", dec!(1000)).await;
    let butter = app.item("Butter", "grams", dec!(500)).await;
    let recipe = app
        .recipe("Shortbread", None, None, vec![raw(flour, dec!(300)), raw(butter, dec!(200))])
        .await;

    let lines = app.services.bom.resolve(recipe).await.unwrap();

    assert_eq!(
        lines,
        vec![
            BaseIngredient {
                item_id: flour,
                name: "Flour".into(),
                unit: "grams".into(),
                quantity: dec!(300),
            },
            BaseIngredient {
                item_id: butter,
                name: "Butter".into(),
                unit: "grams".into(),
                quantity: dec!(200),
            },
        ]
    );
}

#[tokio::test]
async fn mass_yield_scales_by_used_fraction() {
    let app = TestApp::new().await;
    let sugar = app.item("Sugar", "grams", dec!(0)).await;
    let cream = app.item("Cream", "mLs", dec!(0)).await;
    let salt = app.item("Salt", "grams", dec!(0)).await;
    let caramel = app
        .recipe(
            "Caramel",
            Some(dec!(500)),
            Some("grams"),
            vec![raw(sugar, dec!(300)), raw(cream, dec!(200))],
        )
        .await;
    let parent = app
        .recipe(
            "Salted Caramel Jar",
            None,
            None,
            vec![sub(caramel, dec!(250), "grams"), raw(salt, dec!(5))],
        )
        .await;

    let lines = app.services.bom.resolve(parent).await.unwrap();

    assert_eq!(quantity_of(&lines, sugar), dec!(150));
    assert_eq!(quantity_of(&lines, cream), dec!(100));
    assert_eq!(quantity_of(&lines, salt), dec!(5));
}

#[tokio::test]
async fn volume_yield_scales_like_mass() {
    let app = TestApp::new().await;
    let milk = app.item("Milk", "mLs", dec!(0)).await;
    let base = app
        .recipe("Custard Base", Some(dec!(250)), Some("ml"), vec![raw(milk, dec!(200))])
        .await;
    let parent = app
        .recipe("Custard Tart", None, None, vec![sub(base, dec!(750), "mLs")])
        .await;

    let lines = app.services.bom.resolve(parent).await.unwrap();
    assert_eq!(quantity_of(&lines, milk), dec!(600));
}

#[tokio::test]
async fn batches_yield_uses_edge_quantity_as_multiplier() {
    let app = TestApp::new().await;
    let flour = app.item("Flour", "grams", dec!(0)).await;
    let dough = app
        .recipe("Dough", Some(dec!(1)), Some("batches"), vec![raw(flour, dec!(400))])
        .await;
    let double = app
        .recipe("Double Loaf", None, None, vec![sub(dough, dec!(2), "batches")])
        .await;
    let half = app
        .recipe("Half Loaf", None, None, vec![sub(dough, dec!(0.5), "batches")])
        .await;

    let doubled = app.services.bom.resolve(double).await.unwrap();
    let halved = app.services.bom.resolve(half).await.unwrap();

    assert_eq!(quantity_of(&doubled, flour), dec!(800));
    assert_eq!(quantity_of(&halved, flour), dec!(200));
}

#[tokio::test]
async fn unusable_yield_falls_back_to_unscaled_sub_recipe() {
    let app = TestApp::new().await;
    let cocoa = app.item("Cocoa", "grams", dec!(0)).await;
    let ganache = app
        .recipe("Ganache", None, Some("jars"), vec![raw(cocoa, dec!(40))])
        .await;
    let parent = app
        .recipe("Truffles", None, None, vec![sub(ganache, dec!(300), "grams")])
        .await;

    let lines = app.services.bom.resolve(parent).await.unwrap();
    assert_eq!(quantity_of(&lines, cocoa), dec!(40));
}

#[tokio::test]
async fn nested_sub_recipes_multiply_ratios() {
    let app = TestApp::new().await;
    let vanilla = app.item("Vanilla", "mLs", dec!(0)).await;
    let extract = app
        .recipe("Extract Blend", Some(dec!(100)), Some("mLs"), vec![raw(vanilla, dec!(80))])
        .await;
    let syrup = app
        .recipe(
            "Vanilla Syrup",
            Some(dec!(1)),
            Some("batches"),
            vec![sub(extract, dec!(50), "mLs")],
        )
        .await;
    let top = app
        .recipe("Syrup Case", None, None, vec![sub(syrup, dec!(4), "batches")])
        .await;

    let lines = app.services.bom.resolve(top).await.unwrap();
    // 80 * (50 / 100) * 4
    assert_eq!(quantity_of(&lines, vanilla), dec!(160));
}

#[tokio::test]
async fn shared_sub_recipe_is_expanded_once_per_run() {
    let app = TestApp::new().await;
    let sugar = app.item("Sugar", "grams", dec!(0)).await;
    let caramel = app
        .recipe("Caramel", Some(dec!(500)), Some("grams"), vec![raw(sugar, dec!(500))])
        .await;
    let first = app
        .recipe("Caramel Jar", None, None, vec![sub(caramel, dec!(250), "grams")])
        .await;
    let second = app
        .recipe("Caramel Tart", None, None, vec![sub(caramel, dec!(100), "grams")])
        .await;

    let mut cache = ResolutionCache::new();
    let a = app.services.bom.resolve_cached(first, &mut cache).await.unwrap();
    let b = app.services.bom.resolve_cached(second, &mut cache).await.unwrap();

    assert_eq!(quantity_of(&a, sugar), dec!(250));
    assert_eq!(quantity_of(&b, sugar), dec!(100));
    assert_eq!(cache.expansions(), 3);
    assert_eq!(cache.header_loads(), 3);
    assert!(cache.contains(caramel));
}

#[tokio::test]
async fn repeated_resolution_hits_the_cache() {
    let app = TestApp::new().await;
    let sugar = app.item("Sugar", "grams", dec!(0)).await;
    let caramel = app
        .recipe("Caramel", Some(dec!(500)), Some("grams"), vec![raw(sugar, dec!(500))])
        .await;
    let parent = app
        .recipe("Caramel Jar", None, None, vec![sub(caramel, dec!(250), "grams")])
        .await;

    let mut cache = ResolutionCache::new();
    let mut first = resolve_with(app.db.as_ref(), parent, &mut cache).await.unwrap();
    let expansions = cache.expansions();

    // Scaling a returned list must not leak into later cache hits.
    for line in first.iter_mut() {
        line.quantity *= dec!(10);
    }

    let second = resolve_with(app.db.as_ref(), parent, &mut cache).await.unwrap();
    assert_eq!(cache.expansions(), expansions);
    assert_eq!(quantity_of(&second, sugar), dec!(250));
}

#[tokio::test]
async fn saving_a_cycle_is_rejected() {
    let app = TestApp::new().await;
    let sugar = app.item("Sugar", "grams", dec!(0)).await;
    let a = app
        .recipe("Recipe A", Some(dec!(1)), Some("batches"), vec![raw(sugar, dec!(10))])
        .await;
    let b = app
        .recipe("Recipe B", Some(dec!(1)), Some("batches"), vec![sub(a, dec!(1), "batches")])
        .await;

    let result = app
        .services
        .recipes
        .update_recipe(
            a,
            RecipeInput {
                name: "Recipe A".into(),
                yield_quantity: Some(dec!(1)),
                yield_unit: Some("batches".into()),
                is_sold_product: false,
                ingredients: vec![raw(sugar, dec!(10)), sub(b, dec!(1), "batches")],
            },
        )
        .await;

    assert_matches!(result, Err(ServiceError::CyclicRecipe { chain }) if chain == vec![a, b, a]);

    let stored = app.services.recipes.get_recipe(a).await.unwrap();
    assert_eq!(stored.ingredients, vec![raw(sugar, dec!(10))]);
}

#[tokio::test]
async fn multiplier_chain_past_the_decimal_range_is_rejected_on_save() {
    let app = TestApp::new().await;
    let sugar = app.item("Sugar", "grams", dec!(0)).await;
    let base = app
        .recipe("Base Syrup", Some(dec!(1)), Some("batches"), vec![raw(sugar, dec!(1000000000))])
        .await;
    let tank = app
        .recipe("Syrup Tank", Some(dec!(1)), Some("batches"), vec![sub(base, dec!(1000000000), "batches")])
        .await;
    let plant = app
        .recipe("Syrup Plant", Some(dec!(1)), Some("batches"), vec![sub(tank, dec!(1000000000), "batches")])
        .await;

    let result = app
        .services
        .recipes
        .create_recipe(RecipeInput {
            name: "Syrup Network".into(),
            yield_quantity: None,
            yield_unit: None,
            is_sold_product: false,
            ingredients: vec![sub(plant, dec!(1000), "batches")],
        })
        .await;

    assert_matches!(
        result,
        Err(ServiceError::ValidationError(message))
            if message.contains("overflow") && message.contains(&format!("-> {}", plant))
    );
    assert_eq!(app.services.recipes.list_recipes().await.unwrap().len(), 3);
    // The chain below the rejected recipe still resolves.
    let lines = app.services.bom.resolve(plant).await.unwrap();
    assert_eq!(quantity_of(&lines, sugar), dec!(1000000000000000000000000000));
}

#[tokio::test]
async fn cycle_written_outside_the_save_path_fails_resolution() {
    let app = TestApp::new().await;
    let sugar = app.item("Sugar", "grams", dec!(0)).await;
    let a = app.recipe("Recipe A", None, None, vec![raw(sugar, dec!(10))]).await;
    let b = app.recipe("Recipe B", None, None, vec![sub(a, dec!(1), "batches")]).await;

    ingredient::ActiveModel::from_line(a, &sub(b, dec!(1), "batches"))
        .insert(app.db.as_ref())
        .await
        .unwrap();

    let result = app.services.bom.resolve(a).await;
    assert_matches!(result, Err(ServiceError::CyclicRecipe { chain }) if chain == vec![a, b, a]);
}

#[tokio::test]
async fn recipe_cannot_list_itself() {
    let app = TestApp::new().await;
    let a = app.recipe("Recipe A", None, None, vec![]).await;

    let result = app
        .services
        .recipes
        .update_recipe(
            a,
            RecipeInput {
                name: "Recipe A".into(),
                yield_quantity: None,
                yield_unit: None,
                is_sold_product: false,
                ingredients: vec![sub(a, dec!(1), "batches")],
            },
        )
        .await;
    assert_matches!(result, Err(ServiceError::ValidationError(_)));
}

#[tokio::test]
async fn unknown_recipe_is_reported() {
    let app = TestApp::new().await;
    assert_matches!(
        app.services.bom.resolve(999).await,
        Err(ServiceError::RecipeNotFound(999))
    );
}

#[tokio::test]
async fn recipes_list_by_name_with_their_lines() {
    let app = TestApp::new().await;
    let sugar = app.item("Sugar", "grams", dec!(0)).await;
    let toffee = app.recipe("Toffee", None, None, vec![raw(sugar, dec!(200))]).await;
    let brittle = app.recipe("Brittle", None, None, vec![]).await;

    let recipes = app.services.recipes.list_recipes().await.unwrap();
    assert_eq!(
        recipes.iter().map(|r| r.id).collect::<Vec<_>>(),
        vec![brittle, toffee]
    );

    let detail = app.services.recipes.get_recipe(toffee).await.unwrap();
    assert_eq!(detail.recipe.name, "Toffee");
    assert_eq!(detail.ingredients, vec![raw(sugar, dec!(200))]);
}

#[tokio::test]
async fn unit_totals_sum_per_unit_label() {
    let app = TestApp::new().await;
    let sugar = app.item("Sugar", "grams", dec!(0)).await;
    let butter = app.item("Butter", "grams", dec!(0)).await;
    let cream = app.item("Cream", "mLs", dec!(0)).await;
    let recipe = app
        .recipe(
            "Fudge",
            None,
            None,
            vec![raw(sugar, dec!(300)), raw(butter, dec!(50)), raw(cream, dec!(120))],
        )
        .await;

    let totals = app.services.recipes.recipe_unit_totals(recipe).await.unwrap();

    assert_eq!(totals.len(), 2);
    assert_eq!(totals[0].unit, "grams");
    assert_eq!(totals[0].quantity, dec!(350));
    assert_eq!(totals[1].unit, "mLs");
    assert_eq!(totals[1].quantity, dec!(120));
}

#[tokio::test]
async fn referenced_recipe_cannot_be_deleted() {
    let app = TestApp::new().await;
    let sugar = app.item("Sugar", "grams", dec!(0)).await;
    let caramel = app
        .recipe("Caramel", Some(dec!(500)), Some("grams"), vec![raw(sugar, dec!(500))])
        .await;
    let parent = app
        .recipe("Caramel Jar", None, None, vec![sub(caramel, dec!(250), "grams")])
        .await;

    assert_matches!(
        app.services.recipes.delete_recipe(caramel).await,
        Err(ServiceError::ValidationError(_))
    );

    app.services.recipes.delete_recipe(parent).await.unwrap();
    app.services.recipes.delete_recipe(caramel).await.unwrap();
    assert_matches!(
        app.services.recipes.get_recipe(caramel).await,
        Err(ServiceError::RecipeNotFound(_))
    );
}
