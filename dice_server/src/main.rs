// SPDX-FileCopyrightText: 2021 Softbear, Inc.
// SPDX-License-Identifier: AGPL-3.0-or-later

fn main() {
    dice_server::entry_point::entry_point();
}
