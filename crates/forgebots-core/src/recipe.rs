//! Crafting seam. The recipe data model lives outside this crate; the
//! `make` command only consults the trait below.

use std::collections::HashMap;

/// One crafting rule: named inputs with counts, one named output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipe {
    pub inputs: Vec<(usize, String)>,
    pub output: String,
}

/// Source of crafting rules consulted by the `make` command.
pub trait RecipeSource: Send {
    /// The recipe producing `name`, if one exists.
    fn recipe_for(&self, name: &str) -> Option<Recipe>;
}

/// A recipe source with no recipes at all.
#[derive(Debug, Default)]
pub struct NoRecipes;

impl RecipeSource for NoRecipes {
    fn recipe_for(&self, _name: &str) -> Option<Recipe> {
        None
    }
}

/// In-memory recipe table keyed by output name.
#[derive(Debug, Default)]
pub struct RecipeTable {
    recipes: HashMap<String, Recipe>,
}

impl RecipeTable {
    /// An empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a recipe under its output name.
    pub fn insert(&mut self, recipe: Recipe) {
        self.recipes.insert(recipe.output.clone(), recipe);
    }
}

impl RecipeSource for RecipeTable {
    fn recipe_for(&self, name: &str) -> Option<Recipe> {
        self.recipes.get(name).cloned()
    }
}
